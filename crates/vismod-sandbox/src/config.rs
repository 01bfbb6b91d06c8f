//! Runtime configuration.

use std::time::Duration;

use vismod_protocol::DEFAULT_RPC_TIMEOUT_MS;

/// Default frame scheduler interval (~60 fps).
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// Configuration for the sandbox runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Deadline for sandbox → host requests (asset reads).
    pub rpc_timeout: Duration,
    /// Interval of the shared frame scheduler.
    pub frame_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
        }
    }
}

impl RuntimeConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(
                std::env::var("VISMOD_RPC_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RPC_TIMEOUT_MS),
            ),
            frame_interval: Duration::from_millis(
                std::env::var("VISMOD_FRAME_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS)
                    .max(1),
            ),
        }
    }
}
