//! Host-side asset service answering the sandbox's `sdk:*` requests.
//!
//! The sandbox already rejects traversal paths; the host checks again and
//! additionally refuses anything that canonicalizes outside the root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use vismod_protocol::{
    message_type, normalize_asset_dir, normalize_asset_path, ErrorKind, RpcError,
};

use crate::error::HostError;

/// Largest asset `read_text` will return.
pub const MAX_ASSET_BYTES: u64 = 10 * 1024 * 1024;

#[async_trait]
pub trait AssetService: Send + Sync {
    /// Text of one asset, or `None` if it is missing or refused.
    async fn read_text(&self, rel_path: &str) -> Result<Option<String>, HostError>;

    /// Sorted entry names of one asset directory.
    async fn list(&self, rel_dir: &str) -> Result<Vec<String>, HostError>;
}

/// Answer one sandbox → host request.
pub async fn serve_asset_request(
    service: &dyn AssetService,
    kind: &str,
    props: &Value,
) -> Result<Value, RpcError> {
    let arg = |key: &str| props.get(key).and_then(Value::as_str).unwrap_or_default();
    match kind {
        message_type::SDK_READ_ASSET_TEXT => {
            let text = service
                .read_text(arg("relPath"))
                .await
                .map_err(|e| RpcError::new(e.kind(), e.to_string()))?;
            Ok(json!({ "text": text }))
        }
        message_type::SDK_LIST_ASSETS => {
            let entries = service
                .list(arg("relDir"))
                .await
                .map_err(|e| RpcError::new(e.kind(), e.to_string()))?;
            Ok(json!({ "entries": entries }))
        }
        other => Err(RpcError::new(
            ErrorKind::UnknownMessageType,
            format!("unknown sandbox request '{other}'"),
        )),
    }
}

// ─── Filesystem backend ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FsAssetService {
    root: PathBuf,
}

impl FsAssetService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a normalized relative path, refusing escapes through symlinks.
    async fn confine(&self, normalized: &str) -> Option<PathBuf> {
        let base = tokio::fs::canonicalize(&self.root).await.ok()?;
        let candidate = tokio::fs::canonicalize(self.root.join(normalized)).await.ok()?;
        if candidate.starts_with(&base) {
            Some(candidate)
        } else {
            tracing::warn!(path = %normalized, "asset path escapes the assets root");
            None
        }
    }
}

#[async_trait]
impl AssetService for FsAssetService {
    async fn read_text(&self, rel_path: &str) -> Result<Option<String>, HostError> {
        let Some(normalized) = normalize_asset_path(rel_path) else {
            return Ok(None);
        };
        let Some(path) = self.confine(&normalized).await else {
            return Ok(None);
        };

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        if metadata.len() > MAX_ASSET_BYTES {
            tracing::warn!(
                path = %normalized,
                size = metadata.len(),
                "asset exceeds read limit"
            );
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path).await?;
        Ok(String::from_utf8(bytes).ok())
    }

    async fn list(&self, rel_dir: &str) -> Result<Vec<String>, HostError> {
        let Some(normalized) = normalize_asset_dir(rel_dir) else {
            return Ok(Vec::new());
        };
        let Some(dir) = self.confine(&normalized).await else {
            return Ok(Vec::new());
        };
        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    entries.push(name.to_string());
                }
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FsAssetService) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = dir.path().join("assets");
        std::fs::create_dir_all(root.join("textures")).unwrap();
        std::fs::write(root.join("notes.txt"), "hello").unwrap();
        std::fs::write(root.join("textures/b.png"), "png").unwrap();
        std::fs::write(root.join("textures/a.png"), "png").unwrap();
        std::fs::write(root.join(".hidden"), "x").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "top secret").unwrap();
        (dir, FsAssetService::new(root))
    }

    #[tokio::test]
    async fn test_read_text() {
        let (_dir, service) = fixture();
        assert_eq!(service.read_text("notes.txt").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(service.read_text("missing.txt").await.unwrap(), None);
        assert_eq!(service.read_text("textures").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_traversal_refused() {
        let (_dir, service) = fixture();
        for bad in ["../secret.txt", "/etc/passwd", "textures/../../secret.txt", "C:\\x"] {
            assert_eq!(service.read_text(bad).await.unwrap(), None, "{bad:?}");
        }
        assert!(service.list("..").await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_refused() {
        let (dir, service) = fixture();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), service.root().join("link.txt"))
            .unwrap();
        assert_eq!(service.read_text("link.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_sorted_without_hidden() {
        let (_dir, service) = fixture();
        assert_eq!(service.list("").await.unwrap(), vec!["notes.txt", "textures"]);
        assert_eq!(service.list("./textures/").await.unwrap(), vec!["a.png", "b.png"]);
        assert!(service.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serve_asset_request() {
        let (_dir, service) = fixture();
        let reply = serve_asset_request(&service, "sdk:readAssetText", &json!({"relPath": "notes.txt"}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"text": "hello"}));

        let reply = serve_asset_request(&service, "sdk:listAssets", &json!({"relDir": "textures"}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"entries": ["a.png", "b.png"]}));

        let err = serve_asset_request(&service, "sdk:exec", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownMessageType);
    }
}
