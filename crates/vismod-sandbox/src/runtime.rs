//! Sandbox runtime: the message dispatcher inside the isolated context.
//!
//! The runtime owns the instance registry, the class cache and the frame
//! scheduler. It processes one inbound request at a time; responses to its
//! own asset requests are routed by a separate task so a handler can await
//! the host without blocking the link.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use vismod_protocol::{
    message_type, normalize_options, BootSignal, ErrorKind, Frame, Link, MethodCall,
    ModuleSource, PendingRequests, RequestEnvelope, ResponseEnvelope, RpcClient, RpcError,
    SessionToken, Track, TrackModuleRef,
};

use crate::assets::AssetProxy;
use crate::config::RuntimeConfig;
use crate::error::SandboxError;
use crate::loader::{validate_module_type, LoadedClass, ModuleLoader};
use crate::matrix::{MatrixLayout, MATRIX_METHOD};
use crate::module::{InstanceContext, ModuleEngine};
use crate::registry::{CellInstance, InstanceGroup, InstanceRegistry};
use crate::scheduler::FrameScheduler;
use crate::sdk::Sdk;

// ─── Command props ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitTrackProps {
    track: Track,
    #[serde(default)]
    module_sources: HashMap<String, ModuleSource>,
    #[serde(default)]
    assets_base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetMatrixProps {
    instance_id: String,
    track: Track,
    #[serde(default)]
    module_sources: HashMap<String, ModuleSource>,
    #[serde(default)]
    assets_base_url: Option<String>,
    #[serde(default)]
    matrix_options: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeProps {
    instance_id: String,
    method_name: String,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectProps {
    module_type: String,
    source_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestroyInstanceProps {
    instance_id: String,
}

fn parse_props<T: serde::de::DeserializeOwned>(props: Value) -> Result<T, SandboxError> {
    serde_json::from_value(props).map_err(|e| SandboxError::InvalidProps(e.to_string()))
}

// ─── Runtime ────────────────────────────────────────────────────────────

pub struct SandboxRuntime {
    token: SessionToken,
    config: RuntimeConfig,
    loader: ModuleLoader,
    registry: InstanceRegistry,
    scheduler: FrameScheduler,
    assets: AssetProxy,
    host: Option<RpcClient>,
}

impl SandboxRuntime {
    pub fn new(token: SessionToken, engine: Arc<dyn ModuleEngine>, config: RuntimeConfig) -> Self {
        let scheduler = FrameScheduler::new(config.frame_interval);
        Self {
            token,
            config,
            loader: ModuleLoader::new(engine),
            registry: InstanceRegistry::new(),
            scheduler,
            assets: AssetProxy::default(),
            host: None,
        }
    }

    /// Attach the client used for sandbox → host asset requests.
    pub fn attach_host(&mut self, host: RpcClient) {
        self.host = Some(host);
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Validate the token and dispatch one request.
    ///
    /// Requests carrying a foreign token are dropped without a response.
    pub async fn handle_request(&mut self, request: RequestEnvelope) -> Option<ResponseEnvelope> {
        if !self.token.matches(&request.token) {
            tracing::warn!(
                request = %request.kind,
                "dropping request with mismatched session token"
            );
            return None;
        }

        let result = self.dispatch(&request.kind, request.props).await;
        if let Err(e) = &result {
            tracing::debug!(request = %request.kind, error = %e.kind, "request failed: {}", e.message);
        }
        Some(ResponseEnvelope::new(
            self.token.clone(),
            request.kind,
            request.request_id,
            result,
        ))
    }

    /// Dispatch on message type. Panics in handlers become `SANDBOX_FAULT`.
    pub async fn dispatch(&mut self, kind: &str, props: Value) -> Result<Value, RpcError> {
        match AssertUnwindSafe(self.route(kind, props)).catch_unwind().await {
            Ok(result) => result.map_err(RpcError::from),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(request = %kind, "handler panicked: {message}");
                Err(RpcError::new(ErrorKind::SandboxFault, message))
            }
        }
    }

    async fn route(&mut self, kind: &str, props: Value) -> Result<Value, SandboxError> {
        match kind {
            message_type::INIT_TRACK => self.init_track(parse_props(props)?).await,
            message_type::SET_MATRIX_FOR_INSTANCE => {
                self.set_matrix_for_instance(parse_props(props)?).await
            }
            message_type::INVOKE_ON_INSTANCE => self.invoke_on_instance(parse_props(props)?).await,
            message_type::INTROSPECT_MODULE => self.introspect_module(parse_props(props)?),
            message_type::DESTROY_TRACK => Ok(self.destroy_track()),
            message_type::DESTROY_INSTANCE => self.destroy_instance(parse_props(props)?),
            message_type::WORKSPACE_CHANGED => Ok(self.workspace_changed()),
            other => Err(SandboxError::UnknownMessageType(other.to_string())),
        }
    }

    // ─── Commands ───────────────────────────────────────────────────────

    async fn init_track(&mut self, props: InitTrackProps) -> Result<Value, SandboxError> {
        self.teardown();
        self.assets = AssetProxy::new(props.assets_base_url.as_deref(), self.host.clone());

        for (position, module_ref) in props.track.modules.iter().enumerate() {
            self.instantiate(&props.track, module_ref, position, &props.module_sources, None)
                .await?;
        }

        tracing::info!(
            track = %props.track.name,
            modules = props.track.modules.len(),
            instances = self.registry.instance_count(),
            "track initialized"
        );
        Ok(Value::Null)
    }

    async fn set_matrix_for_instance(&mut self, props: SetMatrixProps) -> Result<Value, SandboxError> {
        let position = props
            .track
            .position_of(&props.instance_id)
            .ok_or_else(|| SandboxError::InstanceNotFound(props.instance_id.clone()))?;
        let module_ref = props.track.modules[position].clone();

        self.destroy_group(&props.instance_id);
        if props.assets_base_url.is_some() {
            self.assets = AssetProxy::new(props.assets_base_url.as_deref(), self.host.clone());
        }

        let layout = MatrixLayout::from_value(&normalize_options(props.matrix_options));
        self.instantiate(
            &props.track,
            &module_ref,
            position,
            &props.module_sources,
            Some(layout),
        )
        .await?;
        Ok(Value::Null)
    }

    async fn invoke_on_instance(&mut self, props: InvokeProps) -> Result<Value, SandboxError> {
        let group = self
            .registry
            .get_mut(&props.instance_id)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| SandboxError::InstanceNotFound(props.instance_id.clone()))?;

        let class = group.class().clone();
        if props.method_name == MATRIX_METHOD {
            return Err(SandboxError::InvalidProps(
                "matrix changes go through setMatrixForInstance".into(),
            ));
        }
        if !class.is_callable(&props.method_name) {
            return Err(SandboxError::UnknownMethod {
                module_type: class.module_type().to_string(),
                method: props.method_name,
            });
        }

        let options = bind_options(&class, &props.method_name, props.options);
        group.invoke(&props.method_name, &options).await?;
        Ok(Value::Null)
    }

    fn introspect_module(&mut self, props: IntrospectProps) -> Result<Value, SandboxError> {
        let source = ModuleSource::new(props.module_type.clone(), props.source_text, "");
        let class = self.loader.load_class(&props.module_type, &source)?;
        Ok(serde_json::to_value(class.introspect())?)
    }

    fn destroy_track(&mut self) -> Value {
        let groups = self.teardown();
        let evicted = self.loader.clear_cache();
        if groups > 0 || evicted > 0 {
            tracing::info!(groups, evicted, "track destroyed");
        }
        Value::Null
    }

    fn destroy_instance(&mut self, props: DestroyInstanceProps) -> Result<Value, SandboxError> {
        self.destroy_group(&props.instance_id);
        Ok(Value::Null)
    }

    fn workspace_changed(&mut self) -> Value {
        let evicted = self.loader.clear_cache();
        tracing::debug!(evicted, "workspace changed, class cache cleared");
        Value::Null
    }

    // ─── Lifecycle helpers ──────────────────────────────────────────────

    /// Load, lay out, construct and register one track module, then replay
    /// its constructor calls method by method across all cells.
    async fn instantiate(
        &mut self,
        track: &Track,
        module_ref: &TrackModuleRef,
        position: usize,
        sources: &HashMap<String, ModuleSource>,
        layout: Option<MatrixLayout>,
    ) -> Result<(), SandboxError> {
        let module_type = module_ref.module_type.as_str();
        let instance_id = module_ref.id.as_str();

        validate_module_type(module_type)?;
        let source = sources
            .get(module_type)
            .ok_or_else(|| SandboxError::MissingSource(module_type.to_string()))?;
        let class = self.loader.load_cached(module_type, source)?;

        let calls = track.constructor_calls(instance_id);
        let layout = layout.unwrap_or_else(|| MatrixLayout::from_constructor(calls));
        let z_index = position as u32 + 1;

        let mut cells = Vec::new();
        for cell in layout.cells(z_index) {
            let ctx = InstanceContext {
                instance_id: instance_id.to_string(),
                cell: cell.clone(),
                sdk: Sdk::new(
                    module_type,
                    instance_id,
                    class.bindings().clone(),
                    self.assets.clone(),
                ),
            };
            match class.class().construct(ctx) {
                Ok(instance) => cells.push(CellInstance::new(cell, instance)),
                Err(e) => {
                    // Release what was already built before failing the load.
                    InstanceGroup::new(instance_id, class.clone(), layout.clone(), cells)
                        .destroy_all();
                    return Err(e);
                }
            }
        }

        let frame_cells: Vec<usize> = if class.bindings().binds_frame() {
            cells
                .iter()
                .filter(|c| c.accepts_frames())
                .map(|c| c.cell.index)
                .collect()
        } else {
            Vec::new()
        };

        self.scheduler.unregister(instance_id);
        self.registry
            .insert(InstanceGroup::new(instance_id, class.clone(), layout, cells));
        for index in frame_cells {
            self.scheduler.register(instance_id, index);
        }

        self.replay_constructor(instance_id, &class, calls).await
    }

    async fn replay_constructor(
        &mut self,
        instance_id: &str,
        class: &LoadedClass,
        calls: &[MethodCall],
    ) -> Result<(), SandboxError> {
        for call in calls.iter().filter(|c| c.name != MATRIX_METHOD) {
            if !class.is_callable(&call.name) {
                tracing::warn!(
                    instance_id = %instance_id,
                    module_type = %class.module_type(),
                    method = %call.name,
                    "skipping constructor call to unknown method"
                );
                continue;
            }
            let options = call.options_value(class.method_spec(&call.name));
            let Some(group) = self.registry.get_mut(instance_id) else {
                return Err(SandboxError::InstanceNotFound(instance_id.to_string()));
            };
            group.invoke(&call.name, &options).await?;
        }
        Ok(())
    }

    fn destroy_group(&mut self, instance_id: &str) {
        self.scheduler.unregister(instance_id);
        self.registry.destroy_instance(instance_id);
    }

    /// Destroy every instance and frame registration.
    fn teardown(&mut self) -> usize {
        self.scheduler.clear();
        self.registry.destroy_all()
    }

    /// Advance all frame-aware instances by one frame.
    pub async fn tick(&mut self) -> usize {
        self.scheduler.tick(&mut self.registry).await
    }

    // ─── Event loop ─────────────────────────────────────────────────────

    /// Serve a link until the host end closes.
    ///
    /// Sends the boot signal first, then handles requests one at a time and
    /// drives the shared frame interval between them.
    pub async fn run(self, link: Link) {
        self.run_until(link, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also stops once `shutdown` resolves.
    ///
    /// The request in flight finishes first; live instances are destroyed
    /// before the link end is dropped.
    pub async fn run_until(mut self, link: Link, shutdown: impl Future<Output = ()>) {
        let Link { tx, mut rx } = link;
        tokio::pin!(shutdown);

        let host = RpcClient::new(
            self.token.clone(),
            tx.clone(),
            Arc::new(PendingRequests::new()),
            self.config.rpc_timeout,
        );
        self.attach_host(host.clone());

        if tx.send(Frame::Ready(BootSignal::ready(self.token.clone()))).is_err() {
            tracing::warn!("host link closed before boot");
            return;
        }

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<RequestEnvelope>();
        let router_client = host.clone();
        let router = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    Frame::Request(request) => {
                        if command_tx.send(request).is_err() {
                            break;
                        }
                    }
                    Frame::Response(response) => {
                        if !router_client.accept_response(response) {
                            tracing::debug!("dropping unmatched or late response");
                        }
                    }
                    Frame::Ready(_) => tracing::debug!("ignoring unexpected boot signal"),
                }
            }
            router_client.pending().fail_all();
        });

        let mut frames = tokio::time::interval(self.scheduler.interval());
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                request = command_rx.recv() => {
                    let Some(request) = request else { break };
                    if let Some(response) = self.handle_request(request).await {
                        if tx.send(Frame::Response(response)).is_err() {
                            break;
                        }
                    }
                }
                _ = frames.tick(), if !self.scheduler.is_idle() => {
                    self.tick().await;
                }
                _ = &mut shutdown => {
                    tracing::debug!("sandbox runtime asked to stop");
                    break;
                }
            }
        }

        router.abort();
        self.teardown();
        tracing::debug!("sandbox runtime stopped");
    }
}

/// Bind invocation options, mapping a bare scalar onto the method's first
/// declared option.
fn bind_options(class: &LoadedClass, method: &str, options: Value) -> Value {
    match options {
        Value::Object(_) | Value::Array(_) | Value::Null => normalize_options(options),
        bare => MethodCall::new(method)
            .with_value(bare)
            .options_value(class.method_spec(method)),
    }
}
