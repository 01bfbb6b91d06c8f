//! WASM module engine using Extism (wasmtime).
//!
//! Module bodies are WebAssembly text. Each compiled module is checked for
//! import namespaces and must export `describe`, which returns the class
//! metadata as JSON. Every instance runs in its own Extism plugin with
//! configurable memory limits and fuel-based execution limits.
//!
//! Guests never call helpers directly. A method returns
//! `{"result": ..., "host_requests": [{"function": "SDK.readText", "args": {...}, "reply_to": "onText"}]}`
//! and the engine executes the requests against the instance's `SDK`
//! binding, delivering results to the named callback export.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SandboxError;
use crate::loader::CompilationUnit;
use crate::module::{
    ClassMeta, FrameTick, InstanceContext, ModuleClass, ModuleEngine, ModuleInstance,
};
use crate::sdk::Sdk;

/// Namespace of the Extism kernel functions a guest may import.
pub const HOST_NAMESPACE: &str = "extism:host/env";

const WASI_NAMESPACES: &[&str] = &["wasi_snapshot_preview1", "wasi_unstable"];

pub const DESCRIBE_EXPORT: &str = "describe";
pub const FRAME_EXPORT: &str = "frame";
pub const DESTROY_EXPORT: &str = "destroy";

/// How many rounds of callback → host request → callback are followed.
pub const MAX_CALLBACK_DEPTH: usize = 4;

// ─── Configuration ──────────────────────────────────────────────────────

/// Configuration for the WASM sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum memory in bytes (default: 32 MB).
    pub memory_limit: usize,
    /// Maximum fuel (instructions) per call (default: 1_000_000).
    pub fuel_limit: u64,
    /// Whether to enable WASI (default: false).
    pub wasi_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            fuel_limit: 1_000_000,
            wasi_enabled: false,
        }
    }
}

impl SandboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("VISMOD_MODULE_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(32)
                * 1024
                * 1024,
            fuel_limit: std::env::var("VISMOD_MODULE_FUEL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000_000),
            wasi_enabled: std::env::var("VISMOD_MODULE_WASI_ENABLED")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}

// ─── Guest protocol ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct HostRequest {
    /// Namespaced helper, e.g. `SDK.readText`.
    function: String,
    #[serde(default)]
    args: Value,
    /// Export that receives `{function, result}` once the helper completes.
    #[serde(default)]
    reply_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GuestOutput {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    host_requests: Vec<HostRequest>,
}

fn split_output(output: &[u8]) -> (Value, Vec<HostRequest>) {
    if output.is_empty() {
        return (Value::Null, Vec::new());
    }
    match serde_json::from_slice::<GuestOutput>(output) {
        Ok(out) => (out.result, out.host_requests),
        Err(e) => {
            tracing::debug!(len = output.len(), "guest output is not valid JSON: {e}");
            (Value::Null, Vec::new())
        }
    }
}

// ─── Validation ─────────────────────────────────────────────────────────

/// Validate import namespaces and collect export names.
fn inspect_module(
    module_type: &str,
    wasm_bytes: &[u8],
    wasi_enabled: bool,
) -> Result<HashSet<String>, SandboxError> {
    use wasmparser::{Parser, Payload};

    let mut exports = HashSet::new();
    for payload in Parser::new(0).parse_all(wasm_bytes) {
        let payload =
            payload.map_err(|e| SandboxError::Module(format!("failed to parse WASM: {e}")))?;

        match payload {
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(|e| {
                        SandboxError::Module(format!("failed to read import: {e}"))
                    })?;
                    let allowed = import.module == HOST_NAMESPACE
                        || (wasi_enabled && WASI_NAMESPACES.contains(&import.module));
                    if !allowed {
                        return Err(SandboxError::UnknownImport {
                            module_type: module_type.to_string(),
                            import: format!("{}::{}", import.module, import.name),
                        });
                    }
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| {
                        SandboxError::Module(format!("failed to read export: {e}"))
                    })?;
                    exports.insert(export.name.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(exports)
}

fn build_plugin(
    wasm_bytes: &[u8],
    config: &SandboxConfig,
    module_type: &str,
    config_keys: Vec<(&str, String)>,
) -> Result<extism::Plugin, SandboxError> {
    let mut manifest = extism::Manifest::new([extism::Wasm::data(wasm_bytes.to_vec())])
        .with_memory_max((config.memory_limit / 65536) as u32);
    for (key, value) in config_keys {
        manifest = manifest.with_config_key(key, value);
    }

    if config.wasi_enabled {
        tracing::warn!(
            module_type = %module_type,
            "WASI enabled for module, it can read environment variables"
        );
    }

    extism::PluginBuilder::new(manifest)
        .with_wasi(config.wasi_enabled)
        .with_fuel_limit(config.fuel_limit)
        .build()
        .map_err(|e| SandboxError::Engine(e.to_string()))
}

/// Call an export with raw bytes, classifying limit violations.
fn call_export(
    plugin: &mut extism::Plugin,
    module_type: &str,
    function: &str,
    input: &[u8],
) -> Result<Vec<u8>, SandboxError> {
    plugin
        .call::<&[u8], Vec<u8>>(function, input)
        .map_err(|e| classify_error(module_type, e.to_string()))
}

fn classify_error(module_type: &str, message: String) -> SandboxError {
    if message.contains("fuel") {
        SandboxError::FuelExhausted(module_type.to_string())
    } else if message.contains("memory") {
        SandboxError::MemoryExceeded(module_type.to_string())
    } else {
        SandboxError::Engine(message)
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct WasmEngine {
    config: SandboxConfig,
}

impl WasmEngine {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(SandboxConfig::from_env())
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl ModuleEngine for WasmEngine {
    fn compile(&self, unit: &CompilationUnit) -> Result<Vec<Arc<dyn ModuleClass>>, SandboxError> {
        let module_type = unit.module_type.as_str();
        let wasm = wat::parse_str(unit.spliced()).map_err(|e| {
            SandboxError::Module(format!("module '{module_type}' failed to compile: {e}"))
        })?;

        let exports = inspect_module(module_type, &wasm, self.config.wasi_enabled)?;
        if !exports.contains(DESCRIBE_EXPORT) {
            return Err(SandboxError::NoDefaultExport(module_type.to_string()));
        }

        let preamble = unit.bindings.render_preamble().to_string();
        let mut describer = build_plugin(
            &wasm,
            &self.config,
            module_type,
            vec![("vismod.bindings", preamble.clone())],
        )?;
        let described = call_export(&mut describer, module_type, DESCRIBE_EXPORT, b"{}")?;
        let meta: ClassMeta = serde_json::from_slice(&described).map_err(|e| {
            SandboxError::Module(format!("module '{module_type}' returned invalid metadata: {e}"))
        })?;

        tracing::debug!(
            module_type = %module_type,
            methods = meta.methods.len(),
            "wasm module compiled"
        );

        let class: Arc<dyn ModuleClass> = Arc::new(WasmClass {
            module_type: module_type.to_string(),
            wasm: Arc::new(wasm),
            exports: Arc::new(exports),
            meta,
            preamble,
            config: self.config.clone(),
        });
        Ok(vec![class])
    }
}

struct WasmClass {
    module_type: String,
    wasm: Arc<Vec<u8>>,
    exports: Arc<HashSet<String>>,
    meta: ClassMeta,
    preamble: String,
    config: SandboxConfig,
}

impl ModuleClass for WasmClass {
    fn meta(&self) -> &ClassMeta {
        &self.meta
    }

    fn construct(&self, ctx: InstanceContext) -> Result<Box<dyn ModuleInstance>, SandboxError> {
        let cell = serde_json::to_string(&ctx.cell)?;
        let plugin = build_plugin(
            &self.wasm,
            &self.config,
            &self.module_type,
            vec![
                ("vismod.instance", ctx.instance_id.clone()),
                ("vismod.cell", cell),
                ("vismod.bindings", self.preamble.clone()),
            ],
        )?;
        Ok(Box::new(WasmInstance {
            module_type: self.module_type.clone(),
            instance_id: ctx.instance_id,
            plugin,
            exports: self.exports.clone(),
            sdk: ctx.sdk,
        }))
    }
}

// ─── Instance ───────────────────────────────────────────────────────────

struct WasmInstance {
    module_type: String,
    instance_id: String,
    plugin: extism::Plugin,
    exports: Arc<HashSet<String>>,
    sdk: Sdk,
}

impl WasmInstance {
    /// Call an export with JSON input, then run the host requests it (and
    /// any callbacks it triggers) asked for.
    async fn run(&mut self, function: &str, input: &Value) -> Result<Value, SandboxError> {
        let bytes = serde_json::to_vec(input)?;
        let output = call_export(&mut self.plugin, &self.module_type, function, &bytes)?;
        let (result, requests) = split_output(&output);

        let mut queue: VecDeque<(HostRequest, usize)> =
            requests.into_iter().map(|r| (r, 0)).collect();

        while let Some((request, depth)) = queue.pop_front() {
            let value = match self.sdk.dispatch(&request.function, &request.args).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        module_type = %self.module_type,
                        instance_id = %self.instance_id,
                        function = %request.function,
                        "host request refused: {e}"
                    );
                    continue;
                }
            };

            let Some(callback) = request.reply_to else {
                continue;
            };
            if depth >= MAX_CALLBACK_DEPTH {
                tracing::warn!(
                    module_type = %self.module_type,
                    instance_id = %self.instance_id,
                    "callback depth limit reached, dropping reply"
                );
                continue;
            }
            if !self.exports.contains(&callback) {
                tracing::warn!(
                    module_type = %self.module_type,
                    callback = %callback,
                    "reply_to names a missing export, dropping reply"
                );
                continue;
            }

            let payload = serde_json::to_vec(&json!({
                "function": request.function,
                "result": value,
            }))?;
            let output = call_export(&mut self.plugin, &self.module_type, &callback, &payload)?;
            let (_, more) = split_output(&output);
            queue.extend(more.into_iter().map(|r| (r, depth + 1)));
        }

        Ok(result)
    }
}

#[async_trait]
impl ModuleInstance for WasmInstance {
    async fn call(&mut self, method: &str, options: &Value) -> Result<Value, SandboxError> {
        if !self.exports.contains(method) {
            return Err(SandboxError::UnknownMethod {
                module_type: self.module_type.clone(),
                method: method.to_string(),
            });
        }
        self.run(method, options).await
    }

    fn accepts_frames(&self) -> bool {
        self.exports.contains(FRAME_EXPORT)
    }

    async fn on_frame(&mut self, tick: FrameTick) -> Result<(), SandboxError> {
        let tick = serde_json::to_value(tick)?;
        self.run(FRAME_EXPORT, &tick).await.map(|_| ())
    }

    fn destroy(&mut self) -> Result<(), SandboxError> {
        if self.exports.contains(DESTROY_EXPORT) {
            call_export(&mut self.plugin, &self.module_type, DESTROY_EXPORT, b"{}")?;
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
