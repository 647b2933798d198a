//! Hook stage executor.
//!
//! Callers around a single user turn:
//! 1. User message appended → `pipeline.lifecycle(BeforeSend, ..)`
//! 2. Before the provider call → `pipeline.outbound(..)` on a copy
//! 3. Reply received → `pipeline.inbound(..)`
//! 4. Turn complete → `pipeline.lifecycle(AfterReceive, ..)`
//!
//! Every stage starts from a snapshot and either returns the final
//! conversation or fails as a whole; the snapshot is never modified.
use parley_core::{Capabilities, Conversation, HookExecutionError, LifecycleEvent, Stage};
use tracing::{debug, warn};

use crate::registry::{BoundHook, HookRegistry};

/// Run `hooks` strictly in sequence, each receiving the previous hook's
/// output. The first failure aborts the stage.
pub async fn run_stage(
    stage: Stage,
    snapshot: &Conversation,
    hooks: &[BoundHook],
) -> Result<Conversation, HookExecutionError> {
    let caps = Capabilities::default();
    let mut current = snapshot.clone();

    for hook in hooks {
        debug!(
            stage = %stage,
            plugin = %hook.plugin_id,
            hook = hook.handler.name(),
            order = hook.order,
            "[Pipeline] Running hook"
        );
        current = hook
            .handler
            .call(current, &hook.config, &caps)
            .await
            .map_err(|e| {
                warn!(stage = %stage, plugin = %hook.plugin_id, error = %e, "[Pipeline] Hook failed");
                HookExecutionError {
                    plugin_id: hook.plugin_id.clone(),
                    hook: hook.handler.name().to_string(),
                    stage,
                    cause: format!("{e:#}"),
                }
            })?;
    }

    Ok(current)
}

/// Wraps a registry with one method per stage.
#[derive(Debug, Clone, Default)]
pub struct HookPipeline {
    pub registry: HookRegistry,
}

impl HookPipeline {
    pub fn new(registry: HookRegistry) -> Self {
        Self { registry }
    }

    pub async fn outbound(&self, conversation: &Conversation) -> Result<Conversation, HookExecutionError> {
        debug!("[Pipeline] outbound hooks={}", self.registry.outbound.len());
        run_stage(Stage::Outbound, conversation, &self.registry.outbound).await
    }

    pub async fn inbound(&self, conversation: &Conversation) -> Result<Conversation, HookExecutionError> {
        debug!("[Pipeline] inbound hooks={}", self.registry.inbound.len());
        run_stage(Stage::Inbound, conversation, &self.registry.inbound).await
    }

    pub async fn lifecycle(
        &self,
        event: LifecycleEvent,
        conversation: &Conversation,
    ) -> Result<Conversation, HookExecutionError> {
        let hooks = self.registry.lifecycle_hooks(event);
        debug!("[Pipeline] lifecycle event={} hooks={}", event, hooks.len());
        run_stage(Stage::Lifecycle(event), conversation, hooks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use parley_core::{ConfigValue, Message};
    use parley_plugins::{FnHook, HookHandler};

    fn bound(plugin_id: &str, order: i64, handler: Arc<dyn HookHandler>) -> BoundHook {
        BoundHook {
            plugin_id: plugin_id.into(),
            plugin_name: plugin_id.into(),
            order,
            config: Arc::new(ConfigValue::new()),
            handler,
        }
    }

    fn appender(text: &'static str) -> Arc<dyn HookHandler> {
        Arc::new(FnHook::new(text, move |mut chat: Conversation, _: &ConfigValue| {
            chat.messages.push(Message::system(text));
            Ok(chat)
        }))
    }

    #[tokio::test]
    async fn hooks_run_in_sequence() {
        let hooks = vec![bound("a", 0, appender("one")), bound("b", 1, appender("two"))];
        let snapshot = Conversation::new();
        let out = run_stage(Stage::Outbound, &snapshot, &hooks).await.unwrap();

        let contents: Vec<_> = out.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test]
    async fn failure_stops_the_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            Arc::new(FnHook::new("count", move |chat: Conversation, _: &ConfigValue| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(chat)
            })) as Arc<dyn HookHandler>
        };
        let failing: Arc<dyn HookHandler> =
            Arc::new(FnHook::new("explode", |_: Conversation, _: &ConfigValue| bail!("kaboom")));

        let hooks = vec![
            bound("p1", 0, appender("one")),
            bound("p2", 1, appender("two")),
            bound("p3", 2, failing),
            bound("p4", 3, counted),
        ];
        let snapshot = Conversation::with_messages(vec![Message::user("hi")]);
        let err = run_stage(Stage::Inbound, &snapshot, &hooks).await.unwrap_err();

        assert_eq!(err.plugin_id, "p3");
        assert_eq!(err.hook, "explode");
        assert_eq!(err.stage, Stage::Inbound);
        assert!(err.cause.contains("kaboom"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(snapshot.messages.len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_without_hooks_is_identity() {
        let pipeline = HookPipeline::default();
        let chat = Conversation::with_messages(vec![Message::user("hi")]);
        let out = pipeline.lifecycle(LifecycleEvent::OnInit, &chat).await.unwrap();
        assert_eq!(out, chat);
    }
}
