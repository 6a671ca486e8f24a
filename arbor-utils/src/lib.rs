//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod task;

use serde::{Deserialize, Serialize};

/// Identifier of a management session (NETCONF session-id semantics: ids
/// are non-zero and unique for the lifetime of the server).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SessionId(pub u32);

// ===== impl SessionId =====

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
