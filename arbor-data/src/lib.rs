//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bind;
pub mod defaults;
pub mod diff;
pub mod error;
pub mod netconf;
pub mod validate;

pub use bind::BindMode;
pub use diff::Diff;
pub use error::Error;
pub use netconf::{ErrorTag, ErrorType, RpcError, Validity};
