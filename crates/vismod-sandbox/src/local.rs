//! In-process isolation provider.
//!
//! Runs each sandbox runtime as a tokio task on an in-memory link. Memory and
//! fuel limits come from the engine (e.g. Extism); the task boundary only
//! isolates state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use vismod_protocol::{
    link_pair, ContextGuard, IsolatedContext, IsolationProvider, ProtocolError, SessionToken,
};

use crate::config::RuntimeConfig;
use crate::module::ModuleEngine;
use crate::runtime::SandboxRuntime;

pub struct InProcessIsolation {
    engine: Arc<dyn ModuleEngine>,
    config: RuntimeConfig,
}

impl InProcessIsolation {
    pub fn new(engine: Arc<dyn ModuleEngine>, config: RuntimeConfig) -> Self {
        Self { engine, config }
    }
}

/// How long a stopping runtime may take to destroy its instances.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Asks the runtime to stop, then aborts it if it is still running after
/// [`SHUTDOWN_GRACE`].
struct TaskGuard {
    shutdown: Option<(oneshot::Sender<()>, AbortHandle)>,
}

impl ContextGuard for TaskGuard {
    fn teardown(&mut self) {
        let Some((shutdown, task)) = self.shutdown.take() else {
            return;
        };
        if shutdown.send(()).is_err() || task.is_finished() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                    if !task.is_finished() {
                        tracing::warn!("sandbox runtime did not stop in time, aborting");
                        task.abort();
                    }
                });
            }
            Err(_) => task.abort(),
        }
    }
}

#[async_trait]
impl IsolationProvider for InProcessIsolation {
    async fn create(&self, token: SessionToken) -> Result<IsolatedContext, ProtocolError> {
        let (host_end, sandbox_end) = link_pair();
        let runtime = SandboxRuntime::new(token, self.engine.clone(), self.config.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(runtime.run_until(sandbox_end, async move {
            let _ = shutdown_rx.await;
        }));
        tracing::debug!("in-process sandbox started");
        let guard = TaskGuard {
            shutdown: Some((shutdown_tx, handle.abort_handle())),
        };
        Ok(IsolatedContext::new(host_end, guard))
    }
}
