use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parley_core::{ConfigSchema, LifecycleEvent, Stage};

use crate::handler::HookHandler;

/// A handler plus its sort key. Lower `order` runs first; equal orders keep
/// their collection order.
#[derive(Clone)]
pub struct OrderedHook {
    pub order: i64,
    pub handler: Arc<dyn HookHandler>,
}

impl OrderedHook {
    pub fn new(order: i64, handler: Arc<dyn HookHandler>) -> Self {
        Self { order, handler }
    }
}

impl fmt::Debug for OrderedHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedHook")
            .field("order", &self.order)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Hooks declared by one plugin, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PluginHooks {
    pub outbound: Vec<OrderedHook>,
    pub inbound: Vec<OrderedHook>,
    pub lifecycle: BTreeMap<LifecycleEvent, Vec<OrderedHook>>,
}

impl PluginHooks {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
            && self.inbound.is_empty()
            && self.lifecycle.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.outbound.len()
            + self.inbound.len()
            + self.lifecycle.values().map(Vec::len).sum::<usize>()
    }

    /// `(stage, order, handler name)` for every hook, in a fixed stage
    /// order. Two loads of the same source produce equal signatures.
    pub fn signature(&self) -> Vec<(Stage, i64, String)> {
        let entry = |stage: Stage, h: &OrderedHook| (stage, h.order, h.handler.name().to_string());
        let mut out: Vec<_> = self.outbound.iter().map(|h| entry(Stage::Outbound, h)).collect();
        out.extend(self.inbound.iter().map(|h| entry(Stage::Inbound, h)));
        for (event, hooks) in &self.lifecycle {
            out.extend(hooks.iter().map(|h| entry(Stage::Lifecycle(*event), h)));
        }
        out
    }
}

/// What an evaluator produces from plugin source.
#[derive(Debug, Clone)]
pub struct PluginModule {
    pub name: String,
    pub description: String,
    pub config_schema: ConfigSchema,
    pub hooks: PluginHooks,
}

/// A loaded plugin: the stored id and source plus everything derived from
/// evaluating that source.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub config_schema: ConfigSchema,
    pub source: String,
    pub hooks: PluginHooks,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, source: impl Into<String>, module: PluginModule) -> Self {
        Self {
            id: id.into(),
            name: module.name,
            description: module.description,
            config_schema: module.config_schema,
            source: source.into(),
            hooks: module.hooks,
        }
    }
}
