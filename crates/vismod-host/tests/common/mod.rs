// Shared fixtures for host ↔ sandbox integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vismod_host::{FsAssetService, HostConfig, MemorySourceProvider, SessionManager};
use vismod_protocol::MethodSpec;
use vismod_sandbox::{
    ClassMeta, CompilationUnit, InProcessIsolation, InstanceContext, ModuleClass, ModuleEngine,
    ModuleInstance, RuntimeConfig, SandboxError, Sdk,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

/// Class description carried in the module body after the docblock.
#[derive(Debug, Clone, Default, Deserialize)]
struct Script {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    methods: Vec<MethodSpec>,
}

/// Engine whose modules journal every construction and call.
///
/// `loadText {path}` reads an asset through the SDK; `stall {ms}` sleeps
/// inside the sandbox before answering.
#[derive(Default)]
pub struct JournalEngine {
    compiles: AtomicUsize,
    journal: Journal,
}

impl JournalEngine {
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

impl ModuleEngine for JournalEngine {
    fn compile(&self, unit: &CompilationUnit) -> Result<Vec<Arc<dyn ModuleClass>>, SandboxError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let script: Script = serde_json::from_str(unit.body.trim())
            .map_err(|e| SandboxError::Module(format!("bad module body: {e}")))?;
        Ok(vec![Arc::new(JournalClass {
            meta: ClassMeta {
                name: script.name,
                category: script.category,
                methods: script.methods,
            },
            journal: self.journal.clone(),
        })])
    }
}

struct JournalClass {
    meta: ClassMeta,
    journal: Journal,
}

impl ModuleClass for JournalClass {
    fn meta(&self) -> &ClassMeta {
        &self.meta
    }

    fn construct(&self, ctx: InstanceContext) -> Result<Box<dyn ModuleInstance>, SandboxError> {
        let label = format!("{}#{}", ctx.instance_id, ctx.cell.index);
        self.journal.lock().unwrap().push(format!("construct {label}"));
        Ok(Box::new(JournalInstance {
            label,
            journal: self.journal.clone(),
            sdk: ctx.sdk,
        }))
    }
}

struct JournalInstance {
    label: String,
    journal: Journal,
    sdk: Sdk,
}

#[async_trait]
impl ModuleInstance for JournalInstance {
    async fn call(&mut self, method: &str, options: &Value) -> Result<Value, SandboxError> {
        let entry = match method {
            "loadText" => {
                let path = options["path"].as_str().unwrap_or_default();
                let text = self.sdk.read_text(path).await;
                format!("{} loadText {}", self.label, json!(text))
            }
            "stall" => {
                let ms = options["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("{} stall {ms}", self.label)
            }
            _ => format!("{} {method} {options}", self.label),
        };
        self.journal.lock().unwrap().push(entry);
        Ok(Value::Null)
    }

    fn destroy(&mut self) -> Result<(), SandboxError> {
        self.journal.lock().unwrap().push(format!("destroy {}", self.label));
        Ok(())
    }
}

/// Module text with a docblock importing `imports` and a JSON body.
pub fn module_text(imports: &[&str], body: Value) -> String {
    let imports: Vec<String> = imports.iter().map(|i| format!("\"{i}\"")).collect();
    format!("/**\n * imports = [{}]\n */\n{}", imports.join(", "), body)
}

/// Sources for the `Glow` module used across tests.
pub fn glow_sources() -> MemorySourceProvider {
    let mut sources = MemorySourceProvider::new();
    sources.insert(
        "Glow",
        module_text(
            &["ModuleBase", "readText"],
            json!({
                "name": "Glow",
                "category": "light",
                "methods": [
                    {"name": "setColor", "options": [{"name": "color", "type": "color", "defaultVal": "#ffffff"}]},
                    {"name": "loadText", "options": [{"name": "path", "type": "string", "defaultVal": ""}]},
                    {"name": "stall", "options": [{"name": "ms", "type": "number", "defaultVal": 0}]}
                ]
            }),
        ),
    );
    sources
}

/// A host session manager wired to an in-process sandbox.
pub fn test_manager(engine: Arc<JournalEngine>, assets_dir: &Path) -> SessionManager {
    let config = HostConfig {
        assets_dir: assets_dir.to_path_buf(),
        ..HostConfig::default()
    };
    let isolation = Arc::new(InProcessIsolation::new(engine, RuntimeConfig::default()));
    SessionManager::new(
        isolation,
        Arc::new(FsAssetService::new(assets_dir)),
        &config,
    )
}
