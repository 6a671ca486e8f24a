//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod parse;
pub mod store;
pub mod types;

pub use error::Error;
pub use parse::Statement;
pub use store::{
    Constraint, Identity, Module, SchemaId, SchemaKeyword, SchemaNode,
    SchemaStore,
};
pub use types::{BaseType, TypeSpec};
