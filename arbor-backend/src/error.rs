//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::plugin::Phase;

// Backend errors. Validation failures are not represented here; they are
// `Validity::Invalid` results carrying the client diagnostic.
#[derive(Debug)]
pub enum Error {
    Datastore(arbor_datastore::Error),
    Data(arbor_data::Error),
    Schema(arbor_yang::Error),
    // A plugin callback failed during a transaction phase.
    Plugin(String, Phase, String),
    PluginNotFound(String),
    // Recovery is impossible: no failsafe store exists.
    FailsafeMissing(String),
    // The failsafe store itself failed to commit.
    FailsafeInvalid(String),
    Internal(String),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Datastore(error) => error.fmt(f),
            Error::Data(error) => error.fmt(f),
            Error::Schema(error) => error.fmt(f),
            Error::Plugin(plugin, phase, reason) => {
                write!(
                    f,
                    "plugin \"{plugin}\" failed in {phase:?}: {reason}"
                )
            }
            Error::PluginNotFound(plugin) => {
                write!(f, "no plugin named \"{plugin}\"")
            }
            Error::FailsafeMissing(phase) => {
                write!(f, "{phase} failed and no failsafe store exists")
            }
            Error::FailsafeInvalid(reason) => {
                write!(f, "failsafe store failed to commit: {reason}")
            }
            Error::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<arbor_datastore::Error> for Error {
    fn from(error: arbor_datastore::Error) -> Error {
        Error::Datastore(error)
    }
}

impl From<arbor_data::Error> for Error {
    fn from(error: arbor_data::Error) -> Error {
        Error::Data(error)
    }
}

impl From<arbor_yang::Error> for Error {
    fn from(error: arbor_yang::Error) -> Error {
        Error::Schema(error)
    }
}
