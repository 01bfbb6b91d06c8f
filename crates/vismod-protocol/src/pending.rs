//! In-flight request correlation.
//!
//! Every request id leaves the pending set exactly once: either a matching
//! response resolves it or the deadline removes it. A response arriving after
//! its deadline finds no entry and is discarded.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Map of pending request ids to their response channels.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: DashMap<String, oneshot::Sender<Value>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and its response receiver.
    pub fn register(&self) -> (String, oneshot::Receiver<Value>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.insert(request_id.clone(), tx);
        (request_id, rx)
    }

    /// Deliver a response. Returns `false` if the id is not pending
    /// (already resolved, timed out, or never issued).
    pub fn resolve(&self, request_id: &str, result: Value) -> bool {
        match self.inner.remove(request_id) {
            Some((_, tx)) => {
                // Receiver may have been dropped by a cancelled caller.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop a pending entry without resolving it.
    pub fn forget(&self, request_id: &str) -> bool {
        self.inner.remove(request_id).is_some()
    }

    /// Drop every pending entry; waiting callers observe `LinkClosed`.
    pub fn fail_all(&self) -> usize {
        let count = self.inner.len();
        self.inner.clear();
        count
    }

    /// Wait for the response to `request_id`, removing it on timeout.
    pub async fn wait(
        &self,
        kind: &str,
        request_id: &str,
        rx: oneshot::Receiver<Value>,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ProtocolError::LinkClosed),
            Err(_) => {
                self.forget(request_id);
                Err(ProtocolError::Timeout {
                    kind: kind.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.contains_key(request_id)
    }
}
