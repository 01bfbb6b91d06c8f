//! The `SDK` namespace object handed to module instances.
//!
//! Only helpers bound by the class's docblock are reachable. Calls to unbound
//! helpers are refused and logged.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::assets::AssetProxy;
use crate::bindings::{Bindings, SdkHelper};
use crate::error::SandboxError;

/// Maximum length of a module log line, in characters.
pub const MAX_LOG_CHARS: usize = 2048;

#[derive(Debug, Clone)]
pub struct Sdk {
    module_type: String,
    instance_id: String,
    bindings: Arc<Bindings>,
    assets: AssetProxy,
}

impl Sdk {
    pub fn new(
        module_type: impl Into<String>,
        instance_id: impl Into<String>,
        bindings: Arc<Bindings>,
        assets: AssetProxy,
    ) -> Self {
        Self {
            module_type: module_type.into(),
            instance_id: instance_id.into(),
            bindings,
            assets,
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn allowed(&self, helper: SdkHelper) -> bool {
        if self.bindings.has_helper(helper) {
            return true;
        }
        tracing::warn!(
            module_type = %self.module_type,
            instance_id = %self.instance_id,
            helper = %helper.name(),
            "module called a helper it did not import, refusing"
        );
        false
    }

    pub fn asset_url(&self, rel_path: &str) -> Option<String> {
        if !self.allowed(SdkHelper::AssetUrl) {
            return None;
        }
        self.assets.asset_url(rel_path)
    }

    pub async fn read_text(&self, rel_path: &str) -> Option<String> {
        if !self.allowed(SdkHelper::ReadText) {
            return None;
        }
        self.assets.read_text(rel_path).await
    }

    pub async fn load_json(&self, rel_path: &str) -> Option<Value> {
        if !self.allowed(SdkHelper::LoadJson) {
            return None;
        }
        self.assets.load_json(rel_path).await
    }

    pub async fn list_assets(&self, rel_dir: &str) -> Vec<String> {
        if !self.allowed(SdkHelper::ListAssets) {
            return Vec::new();
        }
        self.assets.list_assets(rel_dir).await
    }

    pub fn log(&self, message: &str) {
        if !self.allowed(SdkHelper::Log) {
            return;
        }
        tracing::info!(
            module_type = %self.module_type,
            instance_id = %self.instance_id,
            "module: {}",
            sanitize_log(message)
        );
    }

    /// Execute a namespaced helper call such as `SDK.readText`.
    ///
    /// Used by engines whose guests request helpers by name.
    pub async fn dispatch(&self, function: &str, args: &Value) -> Result<Value, SandboxError> {
        let helper = SdkHelper::from_qualified(function)
            .filter(|h| self.bindings.has_helper(*h))
            .ok_or_else(|| SandboxError::UnknownImport {
                module_type: self.module_type.clone(),
                import: function.to_string(),
            })?;

        let path = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();

        let result = match helper {
            SdkHelper::AssetUrl => json!(self.asset_url(path("relPath"))),
            SdkHelper::ReadText => json!(self.read_text(path("relPath")).await),
            SdkHelper::LoadJson => self.load_json(path("relPath")).await.unwrap_or(Value::Null),
            SdkHelper::ListAssets => json!(self.list_assets(path("relDir")).await),
            SdkHelper::Log => {
                self.log(path("message"));
                Value::Null
            }
        };
        Ok(result)
    }
}

/// Strip control characters and cap the length of a module log line.
pub fn sanitize_log(message: &str) -> String {
    message
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_LOG_CHARS)
        .collect()
}
