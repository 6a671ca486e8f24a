//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

// Schema store errors.
#[derive(Debug)]
pub enum Error {
    // Module text failed to parse.
    SchemaParse(String, String),
    // An import, include or augment target could not be resolved.
    SchemaDep(String, String),
    // A named type or one of its facets could not be resolved.
    SchemaType(String, String),
    // Module not found in any search path or embedded set.
    ModuleNotFound(String),
    Io(String, std::io::Error),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SchemaParse(module, reason) => {
                write!(f, "failed to parse module \"{module}\": {reason}")
            }
            Error::SchemaDep(module, reason) => {
                write!(
                    f,
                    "unresolved dependency in module \"{module}\": {reason}"
                )
            }
            Error::SchemaType(name, reason) => {
                write!(f, "unresolved type \"{name}\": {reason}")
            }
            Error::ModuleNotFound(module) => {
                write!(f, "module \"{module}\" not found")
            }
            Error::Io(path, error) => {
                write!(f, "failed to read \"{path}\": {error}")
            }
        }
    }
}

impl std::error::Error for Error {}
