//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_utils::SessionId;

use crate::store::Db;

// Datastore manager errors. `Invalid` carries a client-facing diagnostic
// (stored content that no longer binds, bad edit payloads); the other
// variants are operational.
#[derive(Debug)]
pub enum Error {
    Io(String, std::io::Error),
    Xml(arbor_xml::Error),
    Data(arbor_data::Error),
    Invalid(arbor_data::RpcError),
    LockDenied(Db, SessionId),
    NotLocked(Db),
    NotFound(Db),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(path, error) => {
                write!(f, "datastore I/O error on {path}: {error}")
            }
            Error::Xml(error) => error.fmt(f),
            Error::Data(error) => error.fmt(f),
            Error::Invalid(error) => {
                write!(f, "invalid datastore content: {error}")
            }
            Error::LockDenied(db, holder) => {
                write!(
                    f,
                    "datastore \"{db}\" is locked by session {holder}"
                )
            }
            Error::NotLocked(db) => {
                write!(f, "datastore \"{db}\" is not locked by this session")
            }
            Error::NotFound(db) => {
                write!(f, "datastore \"{db}\" does not exist")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<arbor_xml::Error> for Error {
    fn from(error: arbor_xml::Error) -> Error {
        Error::Xml(error)
    }
}

impl From<arbor_data::Error> for Error {
    fn from(error: arbor_data::Error) -> Error {
        Error::Data(error)
    }
}
