//! Host configuration.

use std::path::PathBuf;
use std::time::Duration;

use vismod_protocol::DEFAULT_RPC_TIMEOUT_MS;

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Deadline applied to every host → sandbox request.
    pub rpc_timeout: Duration,
    /// Root directory served to modules through `sdk:*` requests.
    pub assets_dir: PathBuf,
    /// Directory holding `<ModuleType>.wat` sources.
    pub modules_dir: PathBuf,
    /// Prefix of the per-session asset base URL.
    pub assets_base_url: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            assets_dir: PathBuf::from("./assets"),
            modules_dir: PathBuf::from("./modules"),
            assets_base_url: "vismod://assets".to_string(),
        }
    }
}

impl HostConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rpc_timeout: std::env::var("VISMOD_RPC_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.rpc_timeout),
            assets_dir: std::env::var("VISMOD_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            modules_dir: std::env::var("VISMOD_MODULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.modules_dir),
            assets_base_url: std::env::var("VISMOD_ASSETS_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.assets_base_url),
        }
    }
}
