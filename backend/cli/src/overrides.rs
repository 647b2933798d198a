use anyhow::{Context, Result, bail};
use parley_config::coerce_input;
use parley_core::{ConfigSchema, ConfigValue};

/// Split `key=value`.
pub fn split_assignment(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim(), value))
        .with_context(|| format!("expected KEY=VALUE, got '{raw}'"))
}

/// Set `key` in `overrides`, coercing `raw` to the kind the schema declares.
/// An empty value clears the key.
pub fn apply(schema: &ConfigSchema, overrides: &mut ConfigValue, key: &str, raw: &str) -> Result<()> {
    let Some(item) = schema.get(key) else {
        let known: Vec<&str> = schema.keys().map(String::as_str).collect();
        bail!("unknown option '{key}' (available: {})", known.join(", "));
    };
    if raw.is_empty() {
        overrides.remove(key);
    } else {
        overrides.insert(key.to_string(), coerce_input(key, item, raw)?);
    }
    Ok(())
}
