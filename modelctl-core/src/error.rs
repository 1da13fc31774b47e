//! # Error Taxonomy
//!
//! Every module keeps its own `thiserror` enum for the failures it can produce. This module
//! folds them into a single [`Error`] so that callers can decide how to present a failure
//! without string matching:
//!
//! * **User** errors are well understood mistakes (unknown model, bad query, nothing matched).
//!   A one-line message is enough.
//! * **Transfer** errors are integrity failures of a file transfer. Also brief.
//! * **Unexpected** errors are failures we don't expect given a validated schema, or internal
//!   failures reported by the server. These deserve the full source chain.
//!
//! Raw `tonic::Status` values are turned into domain errors by [`classify_status`].
use crate::coerce::CoercionError;
use crate::config::ConfigError;
use crate::grpc::client::GrpcRequestError;
use crate::query::QueryError;
use crate::schema::SchemaError;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use tonic::Code;

/// Prefix the Python server adds to unhandled exceptions.
const APPLICATION_EXCEPTION_PREFIX: &str = "Exception calling application: ";

/// How an [`Error`] should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Transfer,
    Unexpected,
}

/// Identifies the object an operation was acting on, attached to classified errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRef {
    pub model: Option<String>,
    pub id: Option<i32>,
    pub queries: Option<BTreeMap<String, String>>,
}

impl ObjectRef {
    pub fn model(model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..Default::default()
        }
    }

    pub fn with_id(model: &str, id: i32) -> Self {
        Self {
            model: Some(model.to_string()),
            id: Some(id),
            queries: None,
        }
    }

    pub fn with_queries(model: &str, queries: &BTreeMap<String, String>) -> Self {
        Self {
            model: Some(model.to_string()),
            id: None,
            queries: Some(queries.clone()),
        }
    }

    /// Renders the object as a clause appended to messages, e.g. ` [model=Slice, id=1]`.
    /// Empty when nothing is known about the object.
    pub fn clause(&self) -> String {
        let mut parts = Vec::new();
        if let Some(model) = &self.model {
            parts.push(format!("model={model}"));
        }
        if let Some(id) = self.id {
            parts.push(format!("id={id}"));
        }
        if let Some(queries) = &self.queries {
            let rendered: Vec<String> = queries
                .iter()
                .map(|(k, v)| {
                    // Bare values compare for equality.
                    if v.starts_with(['=', '!', '<', '>']) {
                        format!("{k}{v}")
                    } else {
                        format!("{k}={v}")
                    }
                })
                .collect();
            parts.push(format!("query={}", rendered.join(",")));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!(" [{}]", parts.join(", "))
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clause())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // User errors
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(
        "Filter required. Use either an ID, --filter, or --all to specify which models to operate on"
    )]
    FilterRequired,

    #[error("Aborted")]
    Aborted,

    #[error("No Match")]
    NoMatch,

    #[error("Not Found{object}")]
    NotFound { object: ObjectRef },

    #[error("Permission Denied{object}. Please verify username and password are correct")]
    PermissionDenied { object: ObjectRef },

    #[error("{name} version {version} did not match constraint '{constraint}'")]
    VersionConstraint {
        name: String,
        version: String,
        constraint: String,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Operation timed out before the server converged")]
    DeadlineExceeded,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    // Transfer errors
    #[error("{}checksum mismatch (actual={actual}, expected={expected})", name_prefix(.name))]
    ChecksumMismatch {
        name: Option<String>,
        expected: String,
        actual: String,
    },

    // Unexpected errors
    #[error("Internal Error{object}: {message}")]
    Internal { object: ObjectRef, message: String },

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Request(#[from] GrpcRequestError),

    #[error("Failed to connect to '{0}': {1}")]
    Connect(String, #[source] tonic::transport::Error),

    #[error("gRPC call failed: code={:?} message={:?}", .0.code(), .0.message())]
    Rpc(tonic::Status),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            object: ObjectRef::default(),
            message: message.into(),
        }
    }

    /// Classifies a server status carried by this error, attaching `object` as context.
    /// Other errors are returned unchanged.
    pub fn with_object(self, object: ObjectRef) -> Self {
        match self {
            Error::Rpc(status) => classify_status(status, object),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Query(_)
            | Error::FilterRequired
            | Error::Aborted
            | Error::NoMatch
            | Error::NotFound { .. }
            | Error::PermissionDenied { .. }
            | Error::VersionConstraint { .. }
            | Error::InvalidInput(_)
            | Error::DeadlineExceeded
            | Error::Cancelled
            | Error::Config(_) => ErrorCategory::User,
            Error::Coercion(err) if err.is_user_error() => ErrorCategory::User,
            Error::Schema(err) if err.is_user_error() => ErrorCategory::User,
            Error::ChecksumMismatch { .. } => ErrorCategory::Transfer,
            _ => ErrorCategory::Unexpected,
        }
    }

    /// Whether a one-line message is enough to present this error.
    pub fn is_brief(&self) -> bool {
        self.category() != ErrorCategory::Unexpected
    }

    /// Failures of the transport that are worth retrying on a fresh connection.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Rpc(status) => is_transient_status(status),
            Error::Request(GrpcRequestError::ClientNotReady(_)) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Rpc(status) => status.code() == Code::NotFound,
            _ => false,
        }
    }

    /// Renders the error together with its whole chain of sources.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            let _ = write!(out, "\n  caused by: {err}");
            source = err.source();
        }
        let _ = write!(out, "\n  debug: {self:?}");
        out
    }
}

fn name_prefix(name: &Option<String>) -> String {
    name.as_deref().map(|n| format!("{n}: ")).unwrap_or_default()
}

fn is_transient_status(status: &tonic::Status) -> bool {
    status.code() == Code::Unavailable
        || (matches!(status.code(), Code::Internal | Code::Unknown)
            && status.message().contains("RST_STREAM"))
}

/// Converts a status returned by the server into a domain [`Error`].
///
/// Only the categories we know how to present are converted. Everything else passes through
/// unchanged as [`Error::Rpc`], which keeps transient failures recognizable by the retry loop.
pub fn classify_status(status: tonic::Status, object: ObjectRef) -> Error {
    match status.code() {
        Code::PermissionDenied => Error::PermissionDenied { object },
        Code::NotFound => Error::NotFound { object },
        Code::Unknown if !is_transient_status(&status) => {
            let message = status.message();
            let message = message
                .strip_prefix(APPLICATION_EXCEPTION_PREFIX)
                .unwrap_or(message)
                .to_string();
            Error::Internal { object, message }
        }
        _ => Error::Rpc(status),
    }
}
