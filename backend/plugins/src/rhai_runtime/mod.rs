//! Rhai-backed plugin evaluation.
//!
//! A plugin is a Rhai script whose final expression is an object map with
//! `name`, `description`, `configSchema` and optional `inboundHooks`,
//! `outboundHooks` and `anyHooks` arrays. Handlers are function pointers
//! (`Fn("name")` or closures) called as `handler(chat, config, caps)`.

mod convert;
mod handler;

pub use convert::{dynamic_to_json, json_to_dynamic};
pub use handler::RhaiHandler;

use std::sync::Arc;

use chrono::Utc;
use parley_config::{SandboxConfig, check_schema_defaults};
use parley_core::{ConfigSchema, LifecycleEvent, LoadError};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Array, Dynamic, Engine, FnPtr, Map};
use tracing::{debug, info};
use uuid::Uuid;

use crate::descriptor::{OrderedHook, PluginHooks, PluginModule};
use crate::evaluator::Evaluator;

/// Log target for `print`/`debug` output from plugin scripts.
pub const PLUGIN_LOG_TARGET: &str = "parley::plugin";

pub struct RhaiEvaluator {
    engine: Arc<Engine>,
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

impl RhaiEvaluator {
    pub fn new(sandbox: &SandboxConfig) -> Self {
        Self { engine: Arc::new(build_engine(sandbox)) }
    }

    fn parse_module(&self, ast: &Arc<AST>, value: Dynamic) -> Result<PluginModule, LoadError> {
        let type_name = value.type_name();
        let map = value.try_cast::<Map>().ok_or_else(|| {
            LoadError::Malformed(format!("plugin must evaluate to an object map, got {type_name}"))
        })?;

        let name = match map.get("name") {
            Some(v) if v.is_string() => v.to_string(),
            Some(v) => return Err(malformed(format!("`name` must be a string, got {}", v.type_name()))),
            None => return Err(malformed("missing `name`")),
        };
        let description = match map.get("description") {
            None => String::new(),
            Some(v) if v.is_unit() => String::new(),
            Some(v) if v.is_string() => v.to_string(),
            Some(v) => {
                return Err(malformed(format!("`description` must be a string, got {}", v.type_name())));
            }
        };

        let schema_value = map.get("configSchema").ok_or_else(|| malformed("missing `configSchema`"))?;
        let config_schema: ConfigSchema = serde_json::from_value(dynamic_to_json(schema_value))
            .map_err(|e| malformed(format!("invalid `configSchema`: {e}")))?;
        check_schema_defaults(&config_schema).map_err(|e| malformed(e.to_string()))?;

        let mut hooks = PluginHooks::default();
        for (key, item) in hook_items(&map, "outboundHooks")? {
            hooks.outbound.push(self.staged_hook(ast, key, item)?);
        }
        for (key, item) in hook_items(&map, "inboundHooks")? {
            hooks.inbound.push(self.staged_hook(ast, key, item)?);
        }
        for (key, item) in hook_items(&map, "anyHooks")? {
            let event = match item.get("event") {
                Some(v) if v.is_string() => v
                    .to_string()
                    .parse::<LifecycleEvent>()
                    .map_err(|e| malformed(format!("{key}: {e}")))?,
                _ => return Err(malformed(format!("{key}: missing `event`"))),
            };
            let order = match item.get("order") {
                None => 0,
                Some(v) if v.is_unit() => 0,
                Some(v) => v
                    .as_int()
                    .map_err(|_| malformed(format!("{key}: `order` must be an integer")))?,
            };
            let handler = self.handler(ast, &key, &item)?;
            hooks.lifecycle.entry(event).or_default().push(OrderedHook::new(order, handler));
        }

        Ok(PluginModule { name, description, config_schema, hooks })
    }

    /// An `inboundHooks`/`outboundHooks` entry: `order` is required.
    fn staged_hook(&self, ast: &Arc<AST>, key: String, item: Map) -> Result<OrderedHook, LoadError> {
        let order = item
            .get("order")
            .ok_or_else(|| malformed(format!("{key}: missing `order`")))?
            .as_int()
            .map_err(|_| malformed(format!("{key}: `order` must be an integer")))?;
        let handler = self.handler(ast, &key, &item)?;
        Ok(OrderedHook::new(order, handler))
    }

    fn handler(
        &self,
        ast: &Arc<AST>,
        key: &str,
        item: &Map,
    ) -> Result<Arc<RhaiHandler>, LoadError> {
        let value = item
            .get("handler")
            .ok_or_else(|| malformed(format!("{key}: missing `handler`")))?;
        let fn_ptr = if value.is_fnptr() {
            value.clone().cast::<FnPtr>()
        } else if value.is_string() {
            FnPtr::new(value.to_string()).map_err(|e| malformed(format!("{key}: {e}")))?
        } else {
            return Err(malformed(format!(
                "{key}: `handler` must be a function pointer, got {}",
                value.type_name()
            )));
        };
        Ok(Arc::new(RhaiHandler::new(Arc::clone(&self.engine), Arc::clone(ast), fn_ptr)))
    }
}

impl Evaluator for RhaiEvaluator {
    fn load(&self, source: &str) -> Result<PluginModule, LoadError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| LoadError::Compile(e.to_string()))?;
        let value = self
            .engine
            .eval_ast::<Dynamic>(&ast)
            .map_err(|e| LoadError::Eval(e.to_string()))?;

        let module = self.parse_module(&Arc::new(ast), value)?;
        debug!(plugin = %module.name, hooks = module.hooks.len(), "Evaluated plugin source");
        Ok(module)
    }
}

fn malformed(msg: impl Into<String>) -> LoadError {
    LoadError::Malformed(msg.into())
}

/// Entries of an optional hook array, each checked to be an object map and
/// labelled `field[i]` for error messages.
fn hook_items(map: &Map, field: &str) -> Result<Vec<(String, Map)>, LoadError> {
    let Some(value) = map.get(field) else {
        return Ok(Vec::new());
    };
    if value.is_unit() {
        return Ok(Vec::new());
    }
    let array = value
        .clone()
        .try_cast::<Array>()
        .ok_or_else(|| malformed(format!("`{field}` must be an array, got {}", value.type_name())))?;

    array
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let key = format!("{field}[{i}]");
            let type_name = item.type_name();
            item.try_cast::<Map>()
                .map(|m| (key.clone(), m))
                .ok_or_else(|| malformed(format!("{key}: expected an object map, got {type_name}")))
        })
        .collect()
}

fn build_engine(sandbox: &SandboxConfig) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(sandbox.max_operations);
    engine.set_max_call_levels(sandbox.max_call_levels);
    engine.set_max_string_size(sandbox.max_string_size);
    engine.set_max_array_size(sandbox.max_array_size);
    engine.set_max_map_size(sandbox.max_map_size);

    // No `import` of files or packages.
    engine.set_module_resolver(DummyModuleResolver::new());

    engine.on_print(|msg| info!(target: PLUGIN_LOG_TARGET, "{msg}"));
    engine.on_debug(|msg, src, pos| {
        debug!(target: PLUGIN_LOG_TARGET, source = src.unwrap_or("plugin"), position = %pos, "{msg}")
    });

    engine.register_fn("createPlugin", |plugin: Map| plugin);
    engine.register_fn("uuid", || Uuid::new_v4().to_string());
    engine.register_fn("now_iso", || Utc::now().to_rfc3339());

    engine
}
