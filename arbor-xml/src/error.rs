//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

// XML parsing and XPath evaluation errors.
#[derive(Debug)]
pub enum Error {
    // Document is not well-formed XML 1.0.
    Malformed(usize, String),
    // DTD declarations are rejected outright.
    DtdForbidden(usize),
    // Unknown or unterminated entity reference.
    BadEntity(usize, String),
    // A prefix with no in-scope namespace declaration.
    UnknownPrefix(String),
    // XPath expression failed to parse.
    XpathSyntax(String, String),
    // XPath expression evaluated against an unsupported construct.
    XpathEval(String),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Malformed(line, reason) => {
                write!(f, "malformed XML on line {line}: {reason}")
            }
            Error::DtdForbidden(line) => {
                write!(f, "DTD declaration on line {line} is not accepted")
            }
            Error::BadEntity(line, entity) => {
                write!(f, "bad entity reference on line {line}: &{entity};")
            }
            Error::UnknownPrefix(prefix) => {
                write!(f, "no namespace bound to prefix \"{prefix}\"")
            }
            Error::XpathSyntax(expr, reason) => {
                write!(f, "XPath syntax error in \"{expr}\": {reason}")
            }
            Error::XpathEval(reason) => {
                write!(f, "XPath evaluation error: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
