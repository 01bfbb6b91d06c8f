//! Import allow-list and binding synthesis.
//!
//! A module may only bind names from a fixed allow-list. Globals are bound by
//! name; helpers are only ever reachable as members of the single `SDK`
//! namespace object.

use serde_json::{json, Value};

use crate::error::SandboxError;

/// Globals a module may bind by name.
pub const SAFE_GLOBALS: &[&str] = &["ModuleBase", "Frame"];

/// Namespace object grouping every helper.
pub const SDK_NAMESPACE: &str = "SDK";

/// Global that subscribes instances to the shared frame scheduler.
pub const FRAME_GLOBAL: &str = "Frame";

/// Helpers exposed behind the `SDK` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkHelper {
    AssetUrl,
    ReadText,
    LoadJson,
    ListAssets,
    Log,
}

impl SdkHelper {
    pub const ALL: [SdkHelper; 5] = [
        SdkHelper::AssetUrl,
        SdkHelper::ReadText,
        SdkHelper::LoadJson,
        SdkHelper::ListAssets,
        SdkHelper::Log,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SdkHelper::AssetUrl => "assetUrl",
            SdkHelper::ReadText => "readText",
            SdkHelper::LoadJson => "loadJson",
            SdkHelper::ListAssets => "listAssets",
            SdkHelper::Log => "log",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.name() == name)
    }

    /// Resolve a namespaced call such as `SDK.readText`.
    ///
    /// Bare helper names are not callable.
    pub fn from_qualified(function: &str) -> Option<Self> {
        function
            .strip_prefix(SDK_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(Self::from_name)
    }
}

/// The bindings synthesized for one module class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    globals: Vec<&'static str>,
    helpers: Vec<SdkHelper>,
}

impl Bindings {
    /// Check `imports` against the allow-list.
    ///
    /// A single unknown name fails the whole set; nothing is bound partially.
    pub fn from_imports(module_type: &str, imports: &[String]) -> Result<Self, SandboxError> {
        let mut bindings = Bindings::default();

        for import in imports {
            let import = import.trim();
            if let Some(global) = SAFE_GLOBALS.iter().find(|g| **g == import) {
                if !bindings.globals.contains(global) {
                    bindings.globals.push(global);
                }
            } else if import == SDK_NAMESPACE {
                for helper in SdkHelper::ALL {
                    bindings.add_helper(helper);
                }
            } else if let Some(helper) = SdkHelper::from_name(import) {
                bindings.add_helper(helper);
            } else {
                return Err(SandboxError::UnknownImport {
                    module_type: module_type.to_string(),
                    import: import.to_string(),
                });
            }
        }

        Ok(bindings)
    }

    fn add_helper(&mut self, helper: SdkHelper) {
        if !self.helpers.contains(&helper) {
            self.helpers.push(helper);
        }
    }

    pub fn globals(&self) -> &[&'static str] {
        &self.globals
    }

    pub fn helpers(&self) -> &[SdkHelper] {
        &self.helpers
    }

    pub fn has_helper(&self, helper: SdkHelper) -> bool {
        self.helpers.contains(&helper)
    }

    pub fn binds_frame(&self) -> bool {
        self.globals.contains(&FRAME_GLOBAL)
    }

    /// Preamble handed to the engine: bound globals plus the `SDK` object.
    pub fn render_preamble(&self) -> Value {
        let helpers: Vec<&str> = self.helpers.iter().map(|h| h.name()).collect();
        json!({
            "globals": self.globals,
            SDK_NAMESPACE: helpers,
        })
    }
}
