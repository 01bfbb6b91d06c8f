//! Module source providers.
//!
//! A provider returns the current text of a module plus a version stamp.
//! A changed stamp makes the sandbox recompile the class.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use vismod_protocol::{is_valid_module_type, ModuleSource};

use crate::error::HostError;

/// File extension of module sources on disk.
pub const MODULE_EXTENSION: &str = "wat";

#[async_trait]
pub trait ModuleSourceProvider: Send + Sync {
    async fn fetch(&self, module_type: &str) -> Result<ModuleSource, HostError>;
}

/// Hex SHA-256 of a module's text.
pub fn version_stamp(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Reads `<dir>/<ModuleType>.wat`.
#[derive(Debug, Clone)]
pub struct DirectorySourceProvider {
    dir: PathBuf,
}

impl DirectorySourceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ModuleSourceProvider for DirectorySourceProvider {
    async fn fetch(&self, module_type: &str) -> Result<ModuleSource, HostError> {
        // The type becomes a file name; validate before touching the disk.
        if !is_valid_module_type(module_type) {
            return Err(HostError::InvalidModuleType(module_type.to_string()));
        }
        let path = self.dir.join(format!("{module_type}.{MODULE_EXTENSION}"));
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HostError::ModuleNotFound(module_type.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let stamp = version_stamp(&text);
        tracing::debug!(module_type = %module_type, version = %stamp, "module source read");
        Ok(ModuleSource::new(module_type, text, stamp))
    }
}

/// In-memory sources, e.g. for editors holding unsaved buffers.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceProvider {
    sources: HashMap<String, String>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module_type: impl Into<String>, text: impl Into<String>) {
        self.sources.insert(module_type.into(), text.into());
    }
}

#[async_trait]
impl ModuleSourceProvider for MemorySourceProvider {
    async fn fetch(&self, module_type: &str) -> Result<ModuleSource, HostError> {
        let text = self
            .sources
            .get(module_type)
            .ok_or_else(|| HostError::ModuleNotFound(module_type.to_string()))?;
        Ok(ModuleSource::new(module_type, text.clone(), version_stamp(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_stamp_is_sha256_hex() {
        assert_eq!(
            version_stamp(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(version_stamp("a"), version_stamp("b"));
    }

    #[tokio::test]
    async fn test_directory_provider() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(dir.path().join("Glow.wat"), "/* imports = [] */ (module)").unwrap();
        let provider = DirectorySourceProvider::new(dir.path());

        let source = provider.fetch("Glow").await.unwrap();
        assert_eq!(source.module_id, "Glow");
        assert_eq!(source.version_stamp, version_stamp(&source.text));

        assert!(matches!(
            provider.fetch("Missing").await.unwrap_err(),
            HostError::ModuleNotFound(_)
        ));
        assert!(matches!(
            provider.fetch("../Glow").await.unwrap_err(),
            HostError::InvalidModuleType(_)
        ));
    }

    #[tokio::test]
    async fn test_edit_changes_stamp() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("Glow.wat");
        let provider = DirectorySourceProvider::new(dir.path());

        std::fs::write(&path, "v1").unwrap();
        let first = provider.fetch("Glow").await.unwrap();
        std::fs::write(&path, "v2").unwrap();
        let second = provider.fetch("Glow").await.unwrap();
        assert_ne!(first.version_stamp, second.version_stamp);
    }

    #[tokio::test]
    async fn test_memory_provider() {
        let mut provider = MemorySourceProvider::new();
        provider.insert("Glow", "text");
        assert_eq!(provider.fetch("Glow").await.unwrap().text, "text");
        assert!(provider.fetch("Other").await.is_err());
    }
}
