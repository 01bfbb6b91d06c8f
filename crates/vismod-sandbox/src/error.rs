//! Sandbox error types.

use thiserror::Error;
use vismod_protocol::{ErrorKind, ProtocolError, RpcError};

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid module type: '{0}'")]
    InvalidModuleType(String),

    #[error("invalid docblock: {0}")]
    InvalidDocblock(String),

    #[error("module '{module_type}' requests unknown import '{import}'")]
    UnknownImport { module_type: String, import: String },

    #[error("module '{0}' must expose exactly one class")]
    NoDefaultExport(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("module '{module_type}' has no method '{method}'")]
    UnknownMethod { module_type: String, method: String },

    #[error("invalid props: {0}")]
    InvalidProps(String),

    #[error("unknown message type: '{0}'")]
    UnknownMessageType(String),

    #[error("no source supplied for module '{0}'")]
    MissingSource(String),

    #[error("module error: {0}")]
    Module(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("execution limit: module {0} exceeded fuel limit")]
    FuelExhausted(String),

    #[error("memory limit exceeded: module {0}")]
    MemoryExceeded(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl SandboxError {
    /// Wire error kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidModuleType(_) => ErrorKind::InvalidModuleType,
            SandboxError::InvalidDocblock(_) | SandboxError::TomlParse(_) => {
                ErrorKind::InvalidDocblock
            }
            SandboxError::UnknownImport { .. } => ErrorKind::UnknownImport,
            SandboxError::NoDefaultExport(_) => ErrorKind::NoDefaultExport,
            SandboxError::InstanceNotFound(_) => ErrorKind::InstanceNotFound,
            SandboxError::UnknownMethod { .. } => ErrorKind::UnknownMethod,
            SandboxError::InvalidProps(_)
            | SandboxError::MissingSource(_)
            | SandboxError::Serialization(_) => ErrorKind::InvalidProps,
            SandboxError::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
            SandboxError::Module(_)
            | SandboxError::Engine(_)
            | SandboxError::FuelExhausted(_)
            | SandboxError::MemoryExceeded(_) => ErrorKind::SandboxFault,
            SandboxError::Protocol(e) => e.kind(),
        }
    }
}

impl From<SandboxError> for RpcError {
    fn from(err: SandboxError) -> Self {
        RpcError::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_invalid_module_type() {
        let err = SandboxError::InvalidModuleType("../Glow".into());
        assert_eq!(err.to_string(), "invalid module type: '../Glow'");
    }

    #[test]
    fn test_display_unknown_import() {
        let err = SandboxError::UnknownImport {
            module_type: "Glow".into(),
            import: "fs".into(),
        };
        assert_eq!(err.to_string(), "module 'Glow' requests unknown import 'fs'");
    }

    #[test]
    fn test_display_no_default_export() {
        let err = SandboxError::NoDefaultExport("Glow".into());
        assert_eq!(err.to_string(), "module 'Glow' must expose exactly one class");
    }

    #[test]
    fn test_display_fuel_exhausted() {
        let err = SandboxError::FuelExhausted("Glow".into());
        assert_eq!(
            err.to_string(),
            "execution limit: module Glow exceeded fuel limit"
        );
    }

    // ── Kind mapping ──────────────────────────────────────────────────

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SandboxError::InvalidModuleType("x".into()).kind(),
            ErrorKind::InvalidModuleType
        );
        assert_eq!(
            SandboxError::MissingSource("Glow".into()).kind(),
            ErrorKind::InvalidProps
        );
        assert_eq!(SandboxError::Engine("trap".into()).kind(), ErrorKind::SandboxFault);
        assert_eq!(
            SandboxError::Protocol(ProtocolError::Disposed).kind(),
            ErrorKind::Disposed
        );
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= bad").unwrap_err();
        let err: SandboxError = toml_err.into();
        assert!(matches!(err, SandboxError::TomlParse(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidDocblock);
    }

    #[test]
    fn test_into_rpc_error_keeps_message() {
        let rpc: RpcError = SandboxError::InstanceNotFound("glow-1".into()).into();
        assert_eq!(rpc.kind, ErrorKind::InstanceNotFound);
        assert_eq!(rpc.message, "instance not found: glow-1");
    }
}
