//! Asset proxy: the sandbox's only reach into the filesystem.
//!
//! Paths are normalized before anything else. A rejected path never produces
//! an RPC round-trip, and every operation fails closed (`None` / empty).

use serde_json::{json, Value};
use url::Url;

use vismod_protocol::{
    message_type, normalize_asset_dir, normalize_asset_path, ListAssetsReply, RpcClient,
    ReadAssetTextReply,
};

#[derive(Debug, Clone, Default)]
pub struct AssetProxy {
    base_url: Option<Url>,
    host: Option<RpcClient>,
}

impl AssetProxy {
    /// Create a proxy for one track context.
    ///
    /// An unparseable base URL disables `asset_url` but not host reads.
    pub fn new(base_url: Option<&str>, host: Option<RpcClient>) -> Self {
        let base_url = base_url.and_then(|raw| {
            let with_slash = if raw.ends_with('/') {
                raw.to_string()
            } else {
                format!("{raw}/")
            };
            match Url::parse(&with_slash) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!("ignoring invalid assets base URL: {e}");
                    None
                }
            }
        });
        Self { base_url, host }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Resolve `rel_path` against the session-scoped base URL. No I/O.
    pub fn asset_url(&self, rel_path: &str) -> Option<String> {
        let path = normalize_asset_path(rel_path)?;
        let base = self.base_url.as_ref()?;
        base.join(&path).ok().map(String::from)
    }

    pub async fn read_text(&self, rel_path: &str) -> Option<String> {
        let path = normalize_asset_path(rel_path)?;
        let reply: ReadAssetTextReply = self
            .request(message_type::SDK_READ_ASSET_TEXT, json!({ "relPath": path }))
            .await?;
        reply.text
    }

    pub async fn load_json(&self, rel_path: &str) -> Option<Value> {
        let text = self.read_text(rel_path).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(path = %rel_path, "asset is not valid JSON: {e}");
                None
            }
        }
    }

    pub async fn list_assets(&self, rel_dir: &str) -> Vec<String> {
        let Some(dir) = normalize_asset_dir(rel_dir) else {
            return Vec::new();
        };
        self.request::<ListAssetsReply>(message_type::SDK_LIST_ASSETS, json!({ "relDir": dir }))
            .await
            .map(|reply| reply.entries)
            .unwrap_or_default()
    }

    async fn request<T: serde::de::DeserializeOwned>(&self, kind: &str, props: Value) -> Option<T> {
        let host = self.host.as_ref()?;
        match host.call(kind, props).await {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(e) => {
                tracing::debug!(request = %kind, "asset request failed: {e}");
                None
            }
        }
    }
}
