//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::print::escape;
use arbor_xml::{NodeId, XmlTree};
use arbor_yang::{SchemaKeyword, SchemaStore};

/// NETCONF error-tag values used by this implementation (RFC 6241
/// appendix A).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

/// NETCONF error-type values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// A structured rpc-error: what goes inside `<rpc-reply><rpc-error>`.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    // Instance path of the offending node, when known.
    pub path: Option<String>,
    pub message: Option<String>,
    // Pre-rendered error-info XML content.
    pub info: Option<String>,
}

/// Three-valued result of validation-shaped operations: either the data is
/// valid, or it is invalid with a client-facing diagnostic. Internal errors
/// travel separately as [`crate::Error`].
#[derive(Clone, Debug, PartialEq)]
pub enum Validity {
    Valid,
    Invalid(RpcError),
}

// ===== impl ErrorTag =====

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }
}

// ===== impl ErrorType =====

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

// ===== impl RpcError =====

impl RpcError {
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> RpcError {
        RpcError {
            error_type,
            tag,
            path: None,
            message: None,
            info: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> RpcError {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> RpcError {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> RpcError {
        self.info = Some(info.into());
        self
    }

    pub fn invalid_value(message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::InvalidValue)
            .with_message(message)
    }

    pub fn missing_element(element: &str) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::MissingElement)
            .with_info(format!("<bad-element>{}</bad-element>", escape(element)))
    }

    pub fn unknown_element(element: &str) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)
            .with_info(format!("<bad-element>{}</bad-element>", escape(element)))
    }

    pub fn unknown_namespace(namespace: &str) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::UnknownNamespace)
            .with_info(format!(
                "<bad-namespace>{}</bad-namespace>",
                escape(namespace)
            ))
    }

    pub fn operation_failed(message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
            .with_message(message)
    }

    pub fn in_use(message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Protocol, ErrorTag::InUse)
            .with_message(message)
    }

    pub fn lock_denied(session: u32, message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_message(message)
            .with_info(format!("<session-id>{session}</session-id>"))
    }

    pub fn data_exists(path: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::DataExists)
            .with_path(path)
    }

    pub fn data_missing(path: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
            .with_path(path)
    }

    /// Renders the `<rpc-error>` element.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<rpc-error>");
        out.push_str(&format!(
            "<error-type>{}</error-type>",
            self.error_type.as_str()
        ));
        out.push_str(&format!(
            "<error-tag>{}</error-tag>",
            self.tag.as_str()
        ));
        out.push_str("<error-severity>error</error-severity>");
        if let Some(path) = &self.path {
            out.push_str(&format!(
                "<error-path>{}</error-path>",
                escape(path)
            ));
        }
        if let Some(message) = &self.message {
            out.push_str(&format!(
                "<error-message>{}</error-message>",
                escape(message)
            ));
        }
        if let Some(info) = &self.info {
            out.push_str(&format!("<error-info>{info}</error-info>"));
        }
        out.push_str("</rpc-error>");
        out
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag.as_str())?;
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

// ===== impl Validity =====

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }

    pub fn into_result(self) -> Result<(), RpcError> {
        match self {
            Validity::Valid => Ok(()),
            Validity::Invalid(error) => Err(error),
        }
    }
}

// ===== global functions =====

/// The instance path of a node: slash-separated names with list-key
/// predicates where the schema link provides them. Used for error-path.
pub fn instance_path(
    tree: &XmlTree,
    store: &SchemaStore,
    node: NodeId,
) -> String {
    let mut segments = Vec::new();
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        if tree.parent(current).is_none() {
            // The datastore root is the path root, not a segment.
            break;
        }
        let mut segment = tree.name(current).to_owned();
        if let Some(schema) = tree.schema(current)
            && store.node(schema).keyword() == SchemaKeyword::List
        {
            for key in store.node(schema).list_keys() {
                let value = tree.find_body(current, key).unwrap_or("");
                segment.push_str(&format!("[{key}='{value}']"));
            }
        }
        segments.push(segment);
        cursor = tree.parent(current);
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}
