//! Error types for all kindstore operations.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for kindstore operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("query defined to use {active} pagination, cannot run {requested} execution")]
    PaginationConflict {
        active: PaginationMode,
        requested: PaginationMode,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{operation} cancelled: deadline exceeded")]
    Cancelled { operation: &'static str },
}

/// The two mutually exclusive pagination strategies of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    Offset,
    Cursor,
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationMode::Offset => f.write_str("offset"),
            PaginationMode::Cursor => f.write_str("cursor"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("project id is required")]
    EmptyProjectId,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("no endpoint configured (set KINDSTORE_EMULATOR_SOCKET)")]
    NoEndpoint,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake rejected: {0}")]
    Handshake(BackendError),
}

/// Status codes reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendErrorCode {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Unavailable,
    Internal,
    /// The backend answered with something this client cannot interpret.
    Protocol,
}

impl BackendErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorCode::InvalidArgument => "InvalidArgument",
            BackendErrorCode::FailedPrecondition => "FailedPrecondition",
            BackendErrorCode::NotFound => "NotFound",
            BackendErrorCode::Unavailable => "Unavailable",
            BackendErrorCode::Internal => "Internal",
            BackendErrorCode::Protocol => "Protocol",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "InvalidArgument" => Some(BackendErrorCode::InvalidArgument),
            "FailedPrecondition" => Some(BackendErrorCode::FailedPrecondition),
            "NotFound" => Some(BackendErrorCode::NotFound),
            "Unavailable" => Some(BackendErrorCode::Unavailable),
            "Internal" => Some(BackendErrorCode::Internal),
            "Protocol" => Some(BackendErrorCode::Protocol),
            _ => None,
        }
    }
}

/// An error surfaced by the backend for a query, aggregation, put, lookup
/// or delete call. Passed to the caller unmodified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", code.as_str())]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::FailedPrecondition, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Unavailable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Protocol, message)
    }
}

/// The aggregation result did not have the expected shape.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("count result not found under alias '{0}'")]
    MissingAlias(String),

    #[error("unexpected count type for alias '{alias}': {found}")]
    UnexpectedType { alias: String, found: String },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize entity: {0}")]
    Serialize(serde_json::Error),

    #[error("failed to deserialize entity: {0}")]
    Deserialize(serde_json::Error),

    #[error("entity must serialize to an object, got {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor is empty")]
    Empty,

    #[error("cursor is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display_carries_code() {
        let err = BackendError::failed_precondition("no matching index found");
        assert_eq!(err.to_string(), "FailedPrecondition: no matching index found");
    }

    #[test]
    fn test_error_code_parse_roundtrip() {
        for code in [
            BackendErrorCode::InvalidArgument,
            BackendErrorCode::FailedPrecondition,
            BackendErrorCode::NotFound,
            BackendErrorCode::Unavailable,
            BackendErrorCode::Internal,
            BackendErrorCode::Protocol,
        ] {
            assert_eq!(BackendErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(BackendErrorCode::parse("Teapot"), None);
    }

    #[test]
    fn test_pagination_conflict_message() {
        let err = Error::PaginationConflict {
            active: PaginationMode::Cursor,
            requested: PaginationMode::Offset,
        };
        assert_eq!(
            err.to_string(),
            "query defined to use cursor pagination, cannot run offset execution"
        );
    }
}
