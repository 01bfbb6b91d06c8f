//! Scripted module engine for unit tests.
//!
//! The module body (after the docblock) is a JSON script describing the
//! class. Every observable side effect is appended to a shared journal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vismod_protocol::{MethodSpec, ModuleSource};

use crate::error::SandboxError;
use crate::loader::CompilationUnit;
use crate::module::{
    ClassMeta, FrameTick, InstanceContext, ModuleClass, ModuleEngine, ModuleInstance,
};
use crate::sdk::Sdk;

pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Script {
    #[serde(default = "one")]
    classes: usize,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    methods: Vec<MethodSpec>,
    #[serde(default)]
    frames: bool,
    #[serde(default)]
    fail_destroy: bool,
    #[serde(default)]
    fail_on: Option<String>,
    #[serde(default)]
    panic_on: Option<String>,
}

fn one() -> usize {
    1
}

/// Build a module source with the given imports and script body.
pub fn script_source(imports: &[&str], script: Value, version: &str) -> ModuleSource {
    let imports: Vec<String> = imports.iter().map(|i| format!("\"{i}\"")).collect();
    let text = format!("/**\n * imports = [{}]\n */\n{}", imports.join(", "), script);
    ModuleSource::new("", text, version)
}

#[derive(Default)]
pub struct ScriptEngine {
    compiles: AtomicUsize,
    journal: Journal,
}

impl ScriptEngine {
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn entries(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

impl ModuleEngine for ScriptEngine {
    fn compile(&self, unit: &CompilationUnit) -> Result<Vec<Arc<dyn ModuleClass>>, SandboxError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let script: Script = serde_json::from_str(unit.body.trim())
            .map_err(|e| SandboxError::Module(format!("bad script: {e}")))?;

        let class: Arc<dyn ModuleClass> = Arc::new(ScriptClass {
            meta: ClassMeta {
                name: script.name.clone(),
                category: script.category.clone(),
                methods: script.methods.clone(),
            },
            script: script.clone(),
            journal: self.journal.clone(),
        });
        Ok(vec![class; script.classes])
    }
}

struct ScriptClass {
    meta: ClassMeta,
    script: Script,
    journal: Journal,
}

impl ModuleClass for ScriptClass {
    fn meta(&self) -> &ClassMeta {
        &self.meta
    }

    fn construct(&self, ctx: InstanceContext) -> Result<Box<dyn ModuleInstance>, SandboxError> {
        let label = format!("{}#{}", ctx.instance_id, ctx.cell.index);
        self.journal
            .lock()
            .unwrap()
            .push(format!("construct {label}"));
        Ok(Box::new(ScriptInstance {
            label,
            script: self.script.clone(),
            journal: self.journal.clone(),
            sdk: ctx.sdk,
        }))
    }
}

struct ScriptInstance {
    label: String,
    script: Script,
    journal: Journal,
    sdk: Sdk,
}

impl ScriptInstance {
    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ModuleInstance for ScriptInstance {
    async fn call(&mut self, method: &str, options: &Value) -> Result<Value, SandboxError> {
        if self.script.panic_on.as_deref() == Some(method) {
            panic!("scripted panic in {method}");
        }
        if self.script.fail_on.as_deref() == Some(method) {
            return Err(SandboxError::Module(format!("scripted failure in {method}")));
        }
        if method == "loadText" {
            let path = options["path"].as_str().unwrap_or_default();
            let text = self.sdk.read_text(path).await;
            self.record(format!("{} loadText {}", self.label, json!(text)));
            return Ok(Value::Null);
        }
        self.record(format!("{} {method} {options}", self.label));
        Ok(Value::Null)
    }

    fn accepts_frames(&self) -> bool {
        self.script.frames
    }

    async fn on_frame(&mut self, tick: FrameTick) -> Result<(), SandboxError> {
        if self.script.panic_on.as_deref() == Some("frame") {
            panic!("scripted panic in frame {}", tick.frame);
        }
        self.record(format!("frame {} {}", self.label, tick.frame));
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), SandboxError> {
        self.record(format!("destroy {}", self.label));
        if self.script.fail_destroy {
            return Err(SandboxError::Module("scripted destroy failure".into()));
        }
        Ok(())
    }
}
