//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod commit;
pub mod confirmed;
pub mod context;
pub mod error;
pub mod plugin;
pub mod transaction;

pub use commit::CommitParams;
pub use confirmed::{CommitState, ConfirmedCommit, Phase1};
pub use context::{Context, Options};
pub use error::Error;
pub use plugin::{Phase, Plugin, PluginBus};
pub use transaction::{ChangeKind, Transaction};
