//! The hook handler seam.
//!
//! Script-backed and native hooks both implement [`HookHandler`], so the
//! registry and pipeline never know which evaluator produced them.

use anyhow::Result;
use async_trait::async_trait;
use parley_core::{Capabilities, ConfigValue, Conversation};

/// A single hook: takes ownership of a conversation snapshot and returns
/// its complete replacement.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    async fn call(
        &self,
        conversation: Conversation,
        config: &ConfigValue,
        caps: &Capabilities,
    ) -> Result<Conversation>;
}

/// Native hook backed by a closure.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(Conversation, &ConfigValue) -> Result<Conversation> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(Conversation, &ConfigValue) -> Result<Conversation> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        conversation: Conversation,
        config: &ConfigValue,
        _caps: &Capabilities,
    ) -> Result<Conversation> {
        (self.f)(conversation, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Message;

    #[tokio::test]
    async fn fn_hook_sees_config() {
        let hook = FnHook::new("tag", |mut chat: Conversation, config: &ConfigValue| {
            let tag = config.get("tag").cloned().unwrap_or_default();
            chat.metadata.insert("tag".into(), tag);
            Ok(chat)
        });

        let mut config = ConfigValue::new();
        config.insert("tag".into(), "blue".into());
        let out = hook
            .call(Conversation::with_messages(vec![Message::user("hi")]), &config, &Capabilities::default())
            .await
            .unwrap();

        assert_eq!(hook.name(), "tag");
        assert_eq!(out.metadata["tag"], "blue");
        assert_eq!(out.messages.len(), 1);
    }
}
