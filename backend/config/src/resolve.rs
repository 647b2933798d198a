//! Plugin configuration resolution.
//!
//! A plugin's effective config is its schema defaults overlaid with an
//! ordered list of partial layers (lowest precedence first). Only keys the
//! schema declares are resolved; `null` in a layer means "not set here".

use parley_core::schema::value_kind_name;
use parley_core::{ConfigItem, ConfigKind, ConfigSchema, ConfigTypeError, ConfigValue};
use serde_json::Value;

/// Resolve `schema` against `layers`, lowest precedence first.
///
/// For each schema key the highest-index layer that sets it wins; if no
/// layer sets it, the schema default is used. `object` options are
/// deep-merged across layers instead of replaced.
pub fn resolve(schema: &ConfigSchema, layers: &[&ConfigValue]) -> Result<ConfigValue, ConfigTypeError> {
    let mut resolved = ConfigValue::new();

    for (key, item) in schema {
        let mut value = item.default_value.clone();
        for layer in layers {
            let Some(candidate) = layer.get(key) else { continue };
            if candidate.is_null() {
                continue;
            }
            if !item.kind.matches(candidate) {
                return Err(ConfigTypeError {
                    key: key.clone(),
                    expected: item.kind,
                    found: value_kind_name(candidate).to_string(),
                });
            }
            match item.kind {
                ConfigKind::Object => deep_merge(&mut value, candidate),
                _ => value = candidate.clone(),
            }
        }
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

/// Effective config for one plugin in one conversation: schema defaults,
/// then the plugin's global override, then the provider's attachment
/// override, then the chat's.
pub fn effective_config(
    schema: &ConfigSchema,
    global: &ConfigValue,
    provider: Option<&ConfigValue>,
    chat: Option<&ConfigValue>,
) -> Result<ConfigValue, ConfigTypeError> {
    let mut layers = vec![global];
    layers.extend(provider);
    layers.extend(chat);
    resolve(schema, &layers)
}

/// Recursively merge `patch` into `target`.
///
/// Objects merge key by key; any other patch value replaces the target.
/// `null` entries in the patch are skipped.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    let Value::Object(target_map) = target else {
        *target = patch.clone();
        return;
    };
    for (key, patch_val) in patch_map {
        if patch_val.is_null() {
            continue;
        }
        match target_map.get_mut(key) {
            Some(existing) => deep_merge(existing, patch_val),
            None => {
                target_map.insert(key.clone(), patch_val.clone());
            }
        }
    }
}

/// Check that every schema default has the kind its entry declares.
pub fn check_schema_defaults(schema: &ConfigSchema) -> Result<(), ConfigTypeError> {
    for (key, item) in schema {
        if !item.kind.matches(&item.default_value) {
            return Err(ConfigTypeError {
                key: key.clone(),
                expected: item.kind,
                found: value_kind_name(&item.default_value).to_string(),
            });
        }
    }
    Ok(())
}

/// Coerce a raw text input (CLI flag, form field) into a value of the
/// option's kind, e.g. `"3"` into a number for a `number` option.
pub fn coerce_input(key: &str, item: &ConfigItem, raw: &str) -> Result<Value, ConfigTypeError> {
    let mismatch = |found: &str| ConfigTypeError {
        key: key.to_string(),
        expected: item.kind,
        found: found.to_string(),
    };

    match item.kind {
        ConfigKind::String => Ok(Value::String(raw.to_string())),
        ConfigKind::Number => {
            let trimmed = raw.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                return Ok(Value::from(int));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(&format!("'{raw}'")))
        }
        ConfigKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(mismatch(&format!("'{raw}'"))),
        },
        ConfigKind::Object => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(mismatch(value_kind_name(&other))),
            Err(_) => Err(mismatch("invalid JSON")),
        },
    }
}
