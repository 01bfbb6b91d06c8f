//! Error taxonomy shared across the host–sandbox boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds that may appear in an `{ok:false}` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Module type failed the identifier check.
    InvalidModuleType,
    /// Docblock header missing or unparseable.
    InvalidDocblock,
    /// Docblock requested a symbol outside the allow-list.
    UnknownImport,
    /// The compiled unit did not expose exactly one class.
    NoDefaultExport,
    /// No instances registered under the requested instance id.
    InstanceNotFound,
    /// Method is neither declared by the module nor built in.
    UnknownMethod,
    /// Request props could not be decoded.
    InvalidProps,
    /// No response within the RPC deadline.
    RpcTimeout,
    /// Uncaught failure inside a sandbox handler.
    SandboxFault,
    /// Isolation provider absent or sandbox never became ready.
    SessionUnavailable,
    /// Session intentionally torn down.
    Disposed,
    /// Message `type` not recognized by the receiver.
    UnknownMessageType,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidModuleType => "INVALID_MODULE_TYPE",
            ErrorKind::InvalidDocblock => "INVALID_DOCBLOCK",
            ErrorKind::UnknownImport => "UNKNOWN_IMPORT",
            ErrorKind::NoDefaultExport => "NO_DEFAULT_EXPORT",
            ErrorKind::InstanceNotFound => "INSTANCE_NOT_FOUND",
            ErrorKind::UnknownMethod => "UNKNOWN_METHOD",
            ErrorKind::InvalidProps => "INVALID_PROPS",
            ErrorKind::RpcTimeout => "RPC_TIMEOUT",
            ErrorKind::SandboxFault => "SANDBOX_FAULT",
            ErrorKind::SessionUnavailable => "SESSION_UNAVAILABLE",
            ErrorKind::Disposed => "DISPOSED",
            ErrorKind::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
        }
    }

    /// Whether a caller may reasonably retry the same call.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RpcTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in a response result.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RpcError {
    #[serde(rename = "error")]
    pub kind: ErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised by the RPC layer itself.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("request '{kind}' timed out after {timeout_ms} ms")]
    Timeout { kind: String, timeout_ms: u64 },

    #[error("transport link closed")]
    LinkClosed,

    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("session disposed")]
    Disposed,

    #[error("remote error: {0}")]
    Remote(RpcError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Timeout { .. } => ErrorKind::RpcTimeout,
            ProtocolError::LinkClosed | ProtocolError::SessionUnavailable(_) => {
                ErrorKind::SessionUnavailable
            }
            ProtocolError::Disposed => ErrorKind::Disposed,
            ProtocolError::Remote(e) => e.kind,
            ProtocolError::Serialization(_) => ErrorKind::InvalidProps,
        }
    }
}

impl From<ProtocolError> for RpcError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Remote(e) => e,
            other => RpcError::new(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_timeout() {
        let err = ProtocolError::Timeout {
            kind: "initTrack".into(),
            timeout_ms: 3000,
        };
        assert_eq!(err.to_string(), "request 'initTrack' timed out after 3000 ms");
    }

    #[test]
    fn test_display_rpc_error() {
        let err = RpcError::new(ErrorKind::UnknownImport, "fs is not allowed");
        assert_eq!(err.to_string(), "UNKNOWN_IMPORT: fs is not allowed");
    }

    #[test]
    fn test_display_remote() {
        let err = ProtocolError::Remote(RpcError::new(ErrorKind::InstanceNotFound, "glow-1"));
        assert_eq!(err.to_string(), "remote error: INSTANCE_NOT_FOUND: glow-1");
    }

    // ── Kind mapping ──────────────────────────────────────────────────

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ProtocolError::LinkClosed.kind(), ErrorKind::SessionUnavailable);
        assert_eq!(ProtocolError::Disposed.kind(), ErrorKind::Disposed);
        let timeout = ProtocolError::Timeout {
            kind: "x".into(),
            timeout_ms: 1,
        };
        assert_eq!(timeout.kind(), ErrorKind::RpcTimeout);
        assert!(timeout.kind().is_transient());
        assert!(!ErrorKind::UnknownImport.is_transient());
    }

    #[test]
    fn test_remote_error_round_trips_into_rpc_error() {
        let remote = RpcError::new(ErrorKind::NoDefaultExport, "Glow");
        let rpc: RpcError = ProtocolError::Remote(remote.clone()).into();
        assert_eq!(rpc, remote);
    }

    // ── Wire format ───────────────────────────────────────────────────

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::UnknownMessageType).unwrap();
        assert_eq!(json, "\"UNKNOWN_MESSAGE_TYPE\"");
        let kind: ErrorKind = serde_json::from_str("\"INVALID_MODULE_TYPE\"").unwrap();
        assert_eq!(kind, ErrorKind::InvalidModuleType);
        assert_eq!(kind.as_str(), "INVALID_MODULE_TYPE");
    }

    #[test]
    fn test_rpc_error_serializes_kind_as_error_field() {
        let value = serde_json::to_value(RpcError::new(ErrorKind::SandboxFault, "boom")).unwrap();
        assert_eq!(value["error"], "SANDBOX_FAULT");
        assert_eq!(value["message"], "boom");
    }
}
