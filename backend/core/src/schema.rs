//! Plugin configuration schema types.
//!
//! A plugin declares a [`ConfigSchema`]; every layer of overrides and the
//! final resolved config are plain JSON objects ([`ConfigValue`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolved or partial configuration: option name → value.
pub type ConfigValue = serde_json::Map<String, Value>;

/// Option name → typed descriptor. Ordered so equal schemas compare equal.
pub type ConfigSchema = BTreeMap<String, ConfigItem>;

/// The value kind a config option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    String,
    Number,
    Boolean,
    /// Structured option; deep-merged across layers.
    Object,
}

impl ConfigKind {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ConfigKind::String => value.is_string(),
            ConfigKind::Number => value.is_number(),
            ConfigKind::Boolean => value.is_boolean(),
            ConfigKind::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKind::String => "string",
            ConfigKind::Number => "number",
            ConfigKind::Boolean => "boolean",
            ConfigKind::Object => "object",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema entry. Serialized with the plugin API's field names
/// (`type`, `default`, `description`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    #[serde(rename = "type")]
    pub kind: ConfigKind,
    #[serde(rename = "default")]
    pub default_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConfigItem {
    pub fn new(kind: ConfigKind, default_value: Value) -> Self {
        Self { kind, default_value, description: None }
    }
}

/// Short name for the JSON type of a value, used in error messages.
pub fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
