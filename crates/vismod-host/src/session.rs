//! Host session manager.
//!
//! Owns at most one sandbox session at a time. The session is created lazily
//! on the first command, survives request timeouts, and is only torn down by
//! [`SessionManager::destroy`] (or when the manager is dropped). A background
//! pump routes sandbox responses to their waiters and answers the sandbox's
//! `sdk:*` asset requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use vismod_protocol::{
    message_type, ContextGuard, Frame, IntrospectReply, IsolationProvider, ModuleSource,
    PendingRequests, ProtocolError, RpcClient, SessionToken, Track,
};

use crate::assets::{serve_asset_request, AssetService};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::sources::ModuleSourceProvider;

/// Externally visible lifecycle of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session exists yet; the next command creates one.
    Idle,
    /// A session is being created.
    Booting,
    Ready,
    /// Commands fail with `DISPOSED` until [`SessionManager::reset`].
    Disposed,
}

struct ActiveSession {
    client: RpcClient,
    guard: Box<dyn ContextGuard>,
    pump: JoinHandle<()>,
    assets_base_url: String,
}

impl ActiveSession {
    fn shutdown(mut self) {
        self.guard.teardown();
        self.pump.abort();
        let failed = self.client.pending().fail_all();
        if failed > 0 {
            tracing::debug!(count = failed, "failed in-flight requests on teardown");
        }
    }
}

enum SessionState {
    Idle,
    Active(ActiveSession),
    Disposed,
}

/// What a command needs from the live session, cloned out of the lock.
#[derive(Clone)]
struct SessionHandle {
    client: RpcClient,
    assets_base_url: String,
}

pub struct SessionManager {
    provider: Arc<dyn IsolationProvider>,
    assets: Arc<dyn AssetService>,
    rpc_timeout: Duration,
    assets_base_url: String,
    state: Mutex<SessionState>,
    status: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IsolationProvider>,
        assets: Arc<dyn AssetService>,
        config: &HostConfig,
    ) -> Self {
        Self {
            provider,
            assets,
            rpc_timeout: config.rpc_timeout,
            assets_base_url: config.assets_base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(SessionState::Idle),
            status: watch::Sender::new(SessionStatus::Idle),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Current lifecycle status. Never waits on in-flight commands.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Follow status changes, e.g. to show a booting indicator.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Make sure a ready session exists and return its token.
    pub async fn ensure_session(&self) -> Result<SessionToken, ProtocolError> {
        Ok(self.session_handle().await?.client.token().clone())
    }

    async fn session_handle(&self) -> Result<SessionHandle, ProtocolError> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Disposed => return Err(ProtocolError::Disposed),
            SessionState::Active(session) if !session.client.is_closed() => {
                return Ok(SessionHandle {
                    client: session.client.clone(),
                    assets_base_url: session.assets_base_url.clone(),
                });
            }
            _ => {}
        }

        if let SessionState::Active(stale) = std::mem::replace(&mut *state, SessionState::Idle) {
            tracing::warn!("sandbox link closed, recreating session");
            stale.shutdown();
        }

        self.set_status(SessionStatus::Booting);
        let session = match self.boot().await {
            Ok(session) => session,
            Err(e) => {
                self.set_status(SessionStatus::Idle);
                return Err(e);
            }
        };
        self.set_status(SessionStatus::Ready);
        let handle = SessionHandle {
            client: session.client.clone(),
            assets_base_url: session.assets_base_url.clone(),
        };
        *state = SessionState::Active(session);
        Ok(handle)
    }

    async fn boot(&self) -> Result<ActiveSession, ProtocolError> {
        let token = SessionToken::generate();
        let context = self
            .provider
            .create(token.clone())
            .await
            .map_err(|e| match e {
                ProtocolError::SessionUnavailable(_) => e,
                other => ProtocolError::SessionUnavailable(other.to_string()),
            })?;
        let (mut link, mut guard) = context.into_parts();

        let booted = tokio::time::timeout(self.rpc_timeout, wait_for_boot(&mut link.rx, &token))
            .await
            .unwrap_or(false);
        if !booted {
            guard.teardown();
            tracing::error!(
                timeout_ms = self.rpc_timeout.as_millis() as u64,
                "sandbox did not signal ready"
            );
            return Err(ProtocolError::SessionUnavailable(format!(
                "sandbox did not signal ready within {} ms",
                self.rpc_timeout.as_millis()
            )));
        }

        let client = RpcClient::new(
            token,
            link.tx,
            Arc::new(PendingRequests::new()),
            self.rpc_timeout,
        );
        let pump = tokio::spawn(pump_frames(client.clone(), link.rx, self.assets.clone()));

        // Modules see a per-session id, never the token.
        let session_id = Uuid::new_v4();
        tracing::info!(session_id = %session_id, "sandbox session ready");

        Ok(ActiveSession {
            client,
            guard,
            pump,
            assets_base_url: format!("{}/{}/", self.assets_base_url, session_id),
        })
    }

    /// Dispose the session. Never fails, even if no session exists.
    pub async fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, SessionState::Disposed);
        self.set_status(SessionStatus::Disposed);
        if let SessionState::Active(session) = previous {
            session.shutdown();
            tracing::info!("sandbox session destroyed");
        }
    }

    /// Allow a disposed manager to create sessions again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Disposed) {
            *state = SessionState::Idle;
            self.set_status(SessionStatus::Idle);
        }
    }

    // ─── Commands ───────────────────────────────────────────────────────

    /// Send one correlated request to the sandbox.
    ///
    /// A timeout leaves the session in place; a later response for the same
    /// request id is discarded by the pump.
    pub async fn request(&self, kind: &str, props: Value) -> Result<Value, ProtocolError> {
        let handle = self.session_handle().await?;
        tracing::debug!(kind = %kind, "sending sandbox request");
        handle.client.call(kind, props).await
    }

    pub async fn init_track(
        &self,
        track: &Track,
        sources: &HashMap<String, ModuleSource>,
    ) -> Result<(), HostError> {
        let handle = self.session_handle().await?;
        let props = json!({
            "track": track,
            "moduleSources": sources,
            "assetsBaseUrl": handle.assets_base_url,
        });
        handle.client.call(message_type::INIT_TRACK, props).await?;
        tracing::info!(track = %track.name, modules = track.modules.len(), "track initialized");
        Ok(())
    }

    pub async fn set_matrix_for_instance(
        &self,
        track: &Track,
        sources: &HashMap<String, ModuleSource>,
        instance_id: &str,
        matrix_options: Value,
    ) -> Result<(), HostError> {
        let handle = self.session_handle().await?;
        let props = json!({
            "instanceId": instance_id,
            "track": track,
            "moduleSources": sources,
            "assetsBaseUrl": handle.assets_base_url,
            "matrixOptions": matrix_options,
        });
        handle
            .client
            .call(message_type::SET_MATRIX_FOR_INSTANCE, props)
            .await?;
        Ok(())
    }

    pub async fn invoke_on_instance(
        &self,
        instance_id: &str,
        method_name: &str,
        options: Value,
    ) -> Result<Value, HostError> {
        let props = json!({
            "instanceId": instance_id,
            "methodName": method_name,
            "options": options,
        });
        Ok(self.request(message_type::INVOKE_ON_INSTANCE, props).await?)
    }

    pub async fn introspect_module(
        &self,
        module_type: &str,
        source_text: &str,
    ) -> Result<IntrospectReply, HostError> {
        let props = json!({ "moduleType": module_type, "sourceText": source_text });
        let reply = self.request(message_type::INTROSPECT_MODULE, props).await?;
        Ok(serde_json::from_value(reply)?)
    }

    pub async fn destroy_track(&self) -> Result<(), HostError> {
        self.request(message_type::DESTROY_TRACK, json!({})).await?;
        Ok(())
    }

    pub async fn destroy_instance(&self, instance_id: &str) -> Result<(), HostError> {
        self.request(
            message_type::DESTROY_INSTANCE,
            json!({ "instanceId": instance_id }),
        )
        .await?;
        Ok(())
    }

    /// Tell the sandbox that module sources changed on disk.
    pub async fn notify_workspace_changed(&self) -> Result<(), HostError> {
        self.request(message_type::WORKSPACE_CHANGED, json!({}))
            .await?;
        Ok(())
    }

    /// Fetch the source of every module type in `track`, then initialize it.
    pub async fn load_track(
        &self,
        track: &Track,
        provider: &dyn ModuleSourceProvider,
    ) -> Result<(), HostError> {
        let mut sources = HashMap::new();
        for module_type in track.module_types() {
            let source = provider.fetch(module_type).await?;
            sources.insert(module_type.to_string(), source);
        }
        self.init_track(track, &sources).await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let previous = std::mem::replace(self.state.get_mut(), SessionState::Disposed);
        if let SessionState::Active(session) = previous {
            session.shutdown();
        }
    }
}

/// Wait for the `{token, ready:true}` frame matching `token`.
async fn wait_for_boot(rx: &mut mpsc::UnboundedReceiver<Frame>, token: &SessionToken) -> bool {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Ready(boot) if boot.ready && token.matches(&boot.token) => return true,
            _ => tracing::debug!("ignoring frame before boot signal"),
        }
    }
    false
}

/// Route sandbox frames until the link closes.
async fn pump_frames(
    client: RpcClient,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    assets: Arc<dyn AssetService>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Response(response) => {
                if !client.accept_response(response) {
                    tracing::debug!("dropping unmatched or late response");
                }
            }
            Frame::Request(request) => {
                if !client.token().matches(&request.token) {
                    tracing::warn!(kind = %request.kind, "rejecting sandbox request with foreign token");
                    continue;
                }
                let client = client.clone();
                let assets = assets.clone();
                tokio::spawn(async move {
                    let result =
                        serve_asset_request(assets.as_ref(), &request.kind, &request.props).await;
                    if client
                        .respond(&request.kind, request.request_id, result)
                        .is_err()
                    {
                        tracing::debug!("sandbox closed before asset reply");
                    }
                });
            }
            Frame::Ready(_) => tracing::debug!("ignoring repeated boot signal"),
        }
    }
    let failed = client.pending().fail_all();
    tracing::warn!(pending = failed, "sandbox link closed");
}
