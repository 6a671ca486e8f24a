//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod nsctx;
pub mod parse;
pub mod print;
pub mod tree;
pub mod xpath;

pub use error::Error;
pub use nsctx::NsCtx;
pub use tree::{Apply, Attr, NodeId, NodeKind, XmlFlags, XmlNode, XmlTree};
