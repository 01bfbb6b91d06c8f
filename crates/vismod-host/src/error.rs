//! Host error types.

use thiserror::Error;
use vismod_protocol::{ErrorKind, ProtocolError};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("invalid module type: '{0}'")]
    InvalidModuleType(String),

    #[error("module source not found: {0}")]
    ModuleNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::InvalidModuleType(_) => ErrorKind::InvalidModuleType,
            HostError::ModuleNotFound(_)
            | HostError::InvalidArgument(_)
            | HostError::Serialization(_) => ErrorKind::InvalidProps,
            HostError::Io(_) => ErrorKind::SandboxFault,
            HostError::Protocol(e) => e.kind(),
        }
    }
}
