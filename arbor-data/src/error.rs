//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

// Internal (non-diagnostic) errors of the binding, validation and diff
// machinery. User-visible validation failures are not errors; they travel
// as [`crate::Validity::Invalid`].
#[derive(Debug)]
pub enum Error {
    Xml(arbor_xml::Error),
    Yang(arbor_yang::Error),
    Internal(String),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Xml(error) => error.fmt(f),
            Error::Yang(error) => error.fmt(f),
            Error::Internal(reason) => {
                write!(f, "internal error: {reason}")
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

impl From<arbor_yang::Error> for Error {
    fn from(error: arbor_yang::Error) -> Error {
        Error::Yang(error)
    }
}
