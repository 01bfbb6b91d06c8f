//! Bidirectional transport and the RPC client built on top of it.
//!
//! A `Link` is one end of a frame channel. Both the host and the sandbox
//! issue requests over their end through an `RpcClient`, which stamps the
//! session token, correlates responses through `PendingRequests`, and applies
//! the fixed deadline.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::envelope::{decode_result, Frame, RequestEnvelope, ResponseEnvelope};
use crate::error::{ProtocolError, RpcError};
use crate::pending::PendingRequests;
use crate::token::SessionToken;

/// One end of an in-memory frame channel.
#[derive(Debug)]
pub struct Link {
    pub tx: mpsc::UnboundedSender<Frame>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

/// Create two connected link ends: `(host_end, sandbox_end)`.
pub fn link_pair() -> (Link, Link) {
    let (host_tx, sandbox_rx) = mpsc::unbounded_channel();
    let (sandbox_tx, host_rx) = mpsc::unbounded_channel();
    (
        Link {
            tx: host_tx,
            rx: host_rx,
        },
        Link {
            tx: sandbox_tx,
            rx: sandbox_rx,
        },
    )
}

/// Issues correlated requests over a link and answers inbound ones.
#[derive(Debug, Clone)]
pub struct RpcClient {
    token: SessionToken,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Arc<PendingRequests>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(
        token: SessionToken,
        outbound: mpsc::UnboundedSender<Frame>,
        pending: Arc<PendingRequests>,
        timeout: Duration,
    ) -> Self {
        Self {
            token,
            outbound,
            pending,
            timeout,
        }
    }

    /// Send `{token, type, requestId, props}` and await the decoded result.
    pub async fn call(&self, kind: &str, props: Value) -> Result<Value, ProtocolError> {
        let (request_id, rx) = self.pending.register();
        let frame = Frame::Request(RequestEnvelope {
            token: self.token.clone(),
            kind: kind.to_string(),
            request_id: request_id.clone(),
            props,
        });

        if self.outbound.send(frame).is_err() {
            self.pending.forget(&request_id);
            return Err(ProtocolError::LinkClosed);
        }

        let result = self
            .pending
            .wait(kind, &request_id, rx, self.timeout)
            .await?;
        decode_result(result).map_err(ProtocolError::Remote)
    }

    /// Answer an inbound request.
    pub fn respond(
        &self,
        kind: &str,
        request_id: String,
        result: Result<Value, RpcError>,
    ) -> Result<(), ProtocolError> {
        let frame = Frame::Response(ResponseEnvelope::new(
            self.token.clone(),
            kind,
            request_id,
            result,
        ));
        self.outbound
            .send(frame)
            .map_err(|_| ProtocolError::LinkClosed)
    }

    /// Route an inbound response to its waiter.
    ///
    /// Returns `false` for foreign tokens and for ids that are no longer
    /// pending; such responses are dropped.
    pub fn accept_response(&self, response: ResponseEnvelope) -> bool {
        if !self.token.matches(&response.token) {
            return false;
        }
        self.pending.resolve(&response.request_id, response.result)
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
