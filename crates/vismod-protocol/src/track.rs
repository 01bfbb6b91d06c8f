//! Track and module data model.
//!
//! A track lists module references (`{id, type}`) and, per instance id, the
//! constructor-time method calls to replay after instantiation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Check a module type against `^[A-Za-z][A-Za-z0-9]*$`.
pub fn is_valid_module_type(module_type: &str) -> bool {
    let mut chars = module_type.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// Module source text as supplied by the host's source provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSource {
    #[serde(default)]
    pub module_id: String,
    pub text: String,
    pub version_stamp: String,
}

impl ModuleSource {
    pub fn new(
        module_id: impl Into<String>,
        text: impl Into<String>,
        version_stamp: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            text: text.into(),
            version_stamp: version_stamp.into(),
        }
    }
}

/// Declares which module type backs a logical instance slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackModuleRef {
    /// Logical instance id.
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
}

/// One `{name, value}` pair inside a method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodOption {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// A method invocation recorded in a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<MethodOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl MethodCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.options.push(MethodOption {
            name: name.into(),
            value,
        });
        self
    }

    /// Build the options object passed to the method.
    ///
    /// Named options become object keys. A bare `value` is bound to the first
    /// option declared by `spec`, or to `value` when nothing is declared.
    pub fn options_value(&self, spec: Option<&MethodSpec>) -> Value {
        let mut map = Map::new();
        for option in &self.options {
            map.insert(option.name.clone(), option.value.clone());
        }
        if let Some(value) = &self.value {
            let key = spec
                .and_then(|s| s.options.first())
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "value".to_string());
            map.entry(key).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

/// Per-instance data stored in a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleData {
    #[serde(default)]
    pub constructor: Vec<MethodCall>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub methods: Value,
}

/// A track: an ordered list of module instances plus their setup calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub modules: Vec<TrackModuleRef>,
    #[serde(default)]
    pub modules_data: HashMap<String, ModuleData>,
}

impl Track {
    /// Constructor calls declared for an instance id (empty if none).
    pub fn constructor_calls(&self, instance_id: &str) -> &[MethodCall] {
        self.modules_data
            .get(instance_id)
            .map(|d| d.constructor.as_slice())
            .unwrap_or(&[])
    }

    /// Position of an instance id in the module list.
    pub fn position_of(&self, instance_id: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.id == instance_id)
    }

    /// Distinct module types in list order.
    pub fn module_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for module in &self.modules {
            if !seen.contains(&module.module_type.as_str()) {
                seen.push(module.module_type.as_str());
            }
        }
        seen
    }
}

/// Declared option of a module method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSpec {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub default_val: Value,
}

impl OptionSpec {
    pub fn new(name: &str, kind: &str, default_val: Value) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(kind.to_string()),
            default_val,
        }
    }
}

/// Declared method metadata, as reported by introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub execute_on_load: bool,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

impl MethodSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            execute_on_load: false,
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }
}

/// Normalize invocation options.
///
/// Accepts an object (returned as-is), an array of `{name, value}` pairs
/// (folded into an object) or null (empty object). Anything else is wrapped
/// as `{value}`.
pub fn normalize_options(options: Value) -> Value {
    match options {
        Value::Object(_) => options,
        Value::Null => Value::Object(Map::new()),
        Value::Array(items) => {
            let mut map = Map::new();
            for item in items {
                if let Ok(option) = serde_json::from_value::<MethodOption>(item) {
                    map.insert(option.name, option.value);
                }
            }
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_module_types() {
        for ok in ["Glow", "a", "Text3D", "z9"] {
            assert!(is_valid_module_type(ok), "{ok} should be valid");
        }
    }

    #[test]
    fn test_invalid_module_types() {
        for bad in [
            "",
            "3D",
            "_Glow",
            "Glow-Effect",
            "Glow.js",
            "../Glow",
            "Glow Effect",
            "Glöw",
            "Glow;drop",
        ] {
            assert!(!is_valid_module_type(bad), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn test_parse_track_json() {
        let json = json!({
            "name": "Intro",
            "modules": [{"id": "glow-1", "type": "Glow"}],
            "modulesData": {
                "glow-1": {
                    "constructor": [
                        {"name": "matrix", "value": [1, 2]},
                        {"name": "setColor", "value": "#ff0000"}
                    ]
                }
            }
        });
        let track: Track = serde_json::from_value(json).unwrap();
        assert_eq!(track.name, "Intro");
        assert_eq!(track.modules[0].module_type, "Glow");
        let calls = track.constructor_calls("glow-1");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].value, Some(json!([1, 2])));
        assert!(track.constructor_calls("missing").is_empty());
        assert_eq!(track.position_of("glow-1"), Some(0));
    }

    #[test]
    fn test_options_value_binds_bare_value_to_first_declared_option() {
        let spec = MethodSpec::new("setColor").with_option(OptionSpec::new(
            "color",
            "color",
            json!("#ffffff"),
        ));
        let call = MethodCall::new("setColor").with_value(json!("#ff0000"));
        assert_eq!(call.options_value(Some(&spec)), json!({"color": "#ff0000"}));
        assert_eq!(call.options_value(None), json!({"value": "#ff0000"}));
    }

    #[test]
    fn test_options_value_named_options_win() {
        let call = MethodCall::new("scale")
            .with_option("amount", json!(2))
            .with_value(json!(5));
        let spec = MethodSpec::new("scale").with_option(OptionSpec::new("amount", "number", json!(1)));
        assert_eq!(call.options_value(Some(&spec)), json!({"amount": 2}));
    }

    #[test]
    fn test_normalize_options() {
        assert_eq!(normalize_options(Value::Null), json!({}));
        assert_eq!(normalize_options(json!({"a": 1})), json!({"a": 1}));
        assert_eq!(
            normalize_options(json!([{"name": "a", "value": 1}, {"name": "b"}])),
            json!({"a": 1, "b": null})
        );
        assert_eq!(normalize_options(json!(3)), json!({"value": 3}));
    }

    #[test]
    fn test_module_types_are_distinct_in_order() {
        let track = Track {
            modules: vec![
                TrackModuleRef { id: "a".into(), module_type: "Glow".into() },
                TrackModuleRef { id: "b".into(), module_type: "Text".into() },
                TrackModuleRef { id: "c".into(), module_type: "Glow".into() },
            ],
            ..Default::default()
        };
        assert_eq!(track.module_types(), vec!["Glow", "Text"]);
    }
}
