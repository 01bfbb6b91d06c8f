//! Module engine seam, instance traits and built-in base behavior.
//!
//! An engine turns a compilation unit into classes; a class constructs one
//! instance per matrix cell. Built-in methods (`show`, `opacity`, ...) are
//! served by each instance's [`Presentation`] unless the class declares a
//! method with the same name.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vismod_protocol::{MethodSpec, OptionSpec};

use crate::error::SandboxError;
use crate::loader::CompilationUnit;
use crate::matrix::{matrix_spec, CellPlacement};
use crate::sdk::Sdk;

// ─── Engine seam ────────────────────────────────────────────────────────

/// Compiles a combined unit into the classes it exposes.
///
/// Returning anything other than exactly one class fails the load.
pub trait ModuleEngine: Send + Sync {
    fn compile(&self, unit: &CompilationUnit) -> Result<Vec<Arc<dyn ModuleClass>>, SandboxError>;
}

/// Static metadata a class reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

/// Everything an instance learns at construction time.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub instance_id: String,
    pub cell: CellPlacement,
    pub sdk: Sdk,
}

pub trait ModuleClass: Send + Sync {
    fn meta(&self) -> &ClassMeta;

    fn construct(&self, ctx: InstanceContext) -> Result<Box<dyn ModuleInstance>, SandboxError>;
}

/// One frame of the shared scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTick {
    pub frame: u64,
    pub elapsed_ms: u64,
    pub delta_ms: u64,
}

#[async_trait]
pub trait ModuleInstance: Send {
    /// Run a declared method with its options object.
    async fn call(&mut self, method: &str, options: &Value) -> Result<Value, SandboxError>;

    /// Whether the instance wants frame callbacks.
    fn accepts_frames(&self) -> bool {
        false
    }

    async fn on_frame(&mut self, _tick: FrameTick) -> Result<(), SandboxError> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), SandboxError>;
}

// ─── Built-in methods ───────────────────────────────────────────────────

/// Methods every module inherits from the base class.
pub fn builtin_methods() -> Vec<MethodSpec> {
    vec![
        matrix_spec(),
        MethodSpec::new("show"),
        MethodSpec::new("hide"),
        MethodSpec::new("offset")
            .with_option(OptionSpec::new("x", "number", json!(0)))
            .with_option(OptionSpec::new("y", "number", json!(0))),
        MethodSpec::new("scale").with_option(OptionSpec::new("amount", "number", json!(1))),
        MethodSpec::new("opacity").with_option(OptionSpec::new("amount", "number", json!(1))),
        MethodSpec::new("rotate").with_option(OptionSpec::new("degrees", "number", json!(0))),
        MethodSpec::new("background")
            .with_option(OptionSpec::new("color", "color", json!("transparent"))),
    ]
}

/// Base presentation state of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub visible: bool,
    pub opacity: f64,
    pub scale: f64,
    pub rotation: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub background: Option<String>,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 1.0,
            scale: 1.0,
            rotation: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            background: None,
        }
    }
}

impl Presentation {
    /// Apply a built-in method. Returns `false` if `method` is not built in.
    pub fn apply(&mut self, method: &str, options: &Value) -> Result<bool, SandboxError> {
        match method {
            "show" => self.visible = true,
            "hide" => self.visible = false,
            "offset" => {
                self.offset_x = number_option(options, "x", 0.0)?;
                self.offset_y = number_option(options, "y", 0.0)?;
            }
            "scale" => self.scale = number_option(options, "amount", 1.0)?,
            "opacity" => self.opacity = number_option(options, "amount", 1.0)?.clamp(0.0, 1.0),
            "rotate" => self.rotation = number_option(options, "degrees", 0.0)? % 360.0,
            "background" => {
                self.background = match options.get("color") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(color)) => Some(color.clone()),
                    Some(other) => {
                        return Err(SandboxError::InvalidProps(format!(
                            "background color must be a string, got {other}"
                        )))
                    }
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn number_option(options: &Value, name: &str, default: f64) -> Result<f64, SandboxError> {
    match options.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                SandboxError::InvalidProps(format!("option '{name}' must be a number, got {value}"))
            }),
    }
}
