//! Hook registry construction.
//!
//! Given the plugins attached to a conversation, load each one, resolve its
//! effective config and bind every hook it declares to that config. Stage
//! lists are concatenated across plugins and then stable-sorted by `order`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use parley_config::effective_config;
use parley_core::{
    Chat, ChatStore, ConfigSchema, ConfigTypeError, ConfigValue, LifecycleEvent, LoadError, PluginRecord,
    Provider,
};
use parley_plugins::{HookHandler, OrderedHook, PluginDescriptor, PluginLoader};
use tracing::{debug, warn};

/// A hook bound to the config of the plugin that declared it.
#[derive(Clone)]
pub struct BoundHook {
    pub plugin_id: String,
    pub plugin_name: String,
    pub order: i64,
    pub config: Arc<ConfigValue>,
    pub handler: Arc<dyn HookHandler>,
}

impl fmt::Debug for BoundHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHook")
            .field("plugin_id", &self.plugin_id)
            .field("order", &self.order)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Per-stage hook lists for one conversation, already sorted.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    pub outbound: Vec<BoundHook>,
    pub inbound: Vec<BoundHook>,
    pub lifecycle: BTreeMap<LifecycleEvent, Vec<BoundHook>>,
}

impl HookRegistry {
    pub fn lifecycle_hooks(&self, event: LifecycleEvent) -> &[BoundHook] {
        self.lifecycle.get(&event).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
            && self.inbound.is_empty()
            && self.lifecycle.values().all(Vec::is_empty)
    }
}

/// A plugin that could not contribute hooks. Non-fatal: the registry is
/// built from the remaining plugins.
#[derive(Debug)]
pub struct RegistryWarning {
    pub plugin_id: String,
    pub error: LoadError,
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}': {}", self.plugin_id, self.error)
    }
}

/// A stored plugin plus the overrides each holder attached it with.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub record: PluginRecord,
    pub provider_override: Option<ConfigValue>,
    pub chat_override: Option<ConfigValue>,
}

impl ResolvedAttachment {
    pub fn effective_config(&self, schema: &ConfigSchema) -> Result<ConfigValue, ConfigTypeError> {
        effective_config(
            schema,
            &self.record.global_config,
            self.provider_override.as_ref(),
            self.chat_override.as_ref(),
        )
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuild {
    pub registry: HookRegistry,
    pub warnings: Vec<RegistryWarning>,
}

/// The plugins active for `chat`: the provider's attachments first, then
/// chat-only ones, each in insertion order. Attached ids with no stored
/// record become warnings.
pub async fn collect_attachments(
    store: &dyn ChatStore,
    chat: &Chat,
    provider: Option<&Provider>,
) -> Result<(Vec<ResolvedAttachment>, Vec<RegistryWarning>)> {
    let mut ids: Vec<&str> = Vec::new();
    if let Some(provider) = provider {
        ids.extend(provider.plugins.ids());
    }
    for id in chat.plugins.ids() {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let mut attachments = Vec::with_capacity(ids.len());
    let mut warnings = Vec::new();
    for id in ids {
        let Some(record) = store.get_plugin(id).await? else {
            warn!(plugin = %id, chat = %chat.id, "Attached plugin is not stored");
            warnings.push(RegistryWarning {
                plugin_id: id.to_string(),
                error: LoadError::Missing(id.to_string()),
            });
            continue;
        };
        attachments.push(ResolvedAttachment {
            record,
            provider_override: provider.and_then(|p| p.plugins.get(id)).cloned(),
            chat_override: chat.plugins.get(id).cloned(),
        });
    }
    Ok((attachments, warnings))
}

/// Load every attachment and assemble the sorted registry.
///
/// A plugin that fails to load is skipped and reported as a warning. A
/// config kind mismatch aborts the whole build.
pub fn build_registry(
    attachments: &[ResolvedAttachment],
    loader: &PluginLoader,
) -> Result<RegistryBuild, ConfigTypeError> {
    let mut build = RegistryBuild::default();

    for attachment in attachments {
        let record = &attachment.record;
        let descriptor = match loader.load_record(record) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                warn!(plugin = %record.id, error = %error, "Plugin failed to load; skipping its hooks");
                build.warnings.push(RegistryWarning { plugin_id: record.id.clone(), error });
                continue;
            }
        };

        let PluginDescriptor { name, config_schema, hooks, .. } = descriptor;
        let config = Arc::new(attachment.effective_config(&config_schema)?);
        let bind = |hook: OrderedHook| BoundHook {
            plugin_id: record.id.clone(),
            plugin_name: name.clone(),
            order: hook.order,
            config: Arc::clone(&config),
            handler: hook.handler,
        };

        build.registry.outbound.extend(hooks.outbound.into_iter().map(bind));
        build.registry.inbound.extend(hooks.inbound.into_iter().map(bind));
        for (event, list) in hooks.lifecycle {
            build
                .registry
                .lifecycle
                .entry(event)
                .or_default()
                .extend(list.into_iter().map(bind));
        }
    }

    // `sort_by_key` is stable: equal orders keep plugin/declaration order.
    build.registry.outbound.sort_by_key(|h| h.order);
    build.registry.inbound.sort_by_key(|h| h.order);
    for list in build.registry.lifecycle.values_mut() {
        list.sort_by_key(|h| h.order);
    }

    debug!(
        plugins = attachments.len(),
        outbound = build.registry.outbound.len(),
        inbound = build.registry.inbound.len(),
        warnings = build.warnings.len(),
        "Built hook registry"
    );
    Ok(build)
}
