//! Conversation send orchestration.
//!
//! One user turn walks
//! `Idle -> Busy -> UserMessageAppended -> LifecycleBeforeSend -> OutboundHooksApplied
//! -> ProviderCallInFlight -> InboundHooksApplied -> LifecycleAfterReceive -> Idle`
//! and persists the source-of-truth conversation at each checkpoint. Outbound
//! hooks shape a copy that only the provider sees; everything else is
//! written back. One turn per chat may run at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use parley_config::ChatConfig;
use parley_config::defaults::DEFAULT_INTERRUPTION_MARKER;
use parley_core::{
    Chat, ChatError, ChatStore, Conversation, LifecycleEvent, Message, Provider, SecretStore, Stage,
};
use parley_hooks::{HookPipeline, RegistryWarning, build_registry, collect_attachments};
use parley_logging::redact_sensitive_data;
use parley_plugins::PluginLoader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::ProviderCache;
use crate::provider::{ProviderClient, ProviderFactory, ProviderSettings};
use crate::state::{ConfigReport, PluginConfigView, SendOutcome, SendState, StageOutcome};

struct InFlight {
    token: CancellationToken,
    state: SendState,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(sends: &Mutex<HashMap<String, InFlight>>) -> MutexGuard<'_, HashMap<String, InFlight>> {
    sends.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of an active turn. Dropping it returns the chat to `Idle`,
/// whichever way the turn ended.
struct TurnGuard {
    chat_id: String,
    sends: InFlightMap,
    token: CancellationToken,
}

impl TurnGuard {
    fn set_state(&self, state: SendState) {
        if let Some(entry) = lock(&self.sends).get_mut(&self.chat_id) {
            entry.state = state;
        }
        debug!(chat = %self.chat_id, %state, "Send state");
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        lock(&self.sends).remove(&self.chat_id);
    }
}

struct Reply {
    interrupted: bool,
}

pub struct Orchestrator {
    store: Arc<dyn ChatStore>,
    secrets: Arc<dyn SecretStore>,
    loader: PluginLoader,
    factory: Arc<dyn ProviderFactory>,
    providers: ProviderCache,
    interruption_marker: String,
    sends: InFlightMap,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        secrets: Arc<dyn SecretStore>,
        loader: PluginLoader,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            store,
            secrets,
            loader,
            factory,
            providers: ProviderCache::new(),
            interruption_marker: DEFAULT_INTERRUPTION_MARKER.to_string(),
            sends: Arc::default(),
        }
    }

    pub fn with_chat_config(mut self, config: &ChatConfig) -> Self {
        self.interruption_marker = config.interruption_marker.clone();
        self
    }

    /// Provider clients created so far. Evict an entry after editing the
    /// provider it was built from.
    pub fn providers(&self) -> &ProviderCache {
        &self.providers
    }

    /// Current state of `chat_id`'s turn; `Idle` when none is running.
    pub fn state(&self, chat_id: &str) -> SendState {
        lock(&self.sends)
            .get(chat_id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Trip the cancellation token of the active turn. It only takes effect
    /// at the provider call. Returns false when nothing is running.
    pub fn cancel(&self, chat_id: &str) -> bool {
        match lock(&self.sends).get(chat_id) {
            Some(entry) => {
                info!(chat = %chat_id, state = %entry.state, "Cancelling send");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, chat_id: &str, state: SendState) -> Result<TurnGuard, ChatError> {
        let mut sends = lock(&self.sends);
        if sends.contains_key(chat_id) {
            return Err(ChatError::SendInFlight(chat_id.to_string()));
        }
        let token = CancellationToken::new();
        sends.insert(chat_id.to_string(), InFlight { token: token.clone(), state });
        Ok(TurnGuard {
            chat_id: chat_id.to_string(),
            sends: Arc::clone(&self.sends),
            token,
        })
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Chat, ChatError> {
        self.store
            .get_chat(chat_id)
            .await
            .map_err(ChatError::Storage)?
            .ok_or_else(|| ChatError::not_found("chat", chat_id))
    }

    async fn load_provider(&self, chat: &Chat) -> Result<Option<Provider>, ChatError> {
        let Some(provider_id) = chat.provider_id.as_deref() else {
            return Ok(None);
        };
        self.store
            .get_provider(provider_id)
            .await
            .map_err(ChatError::Storage)?
            .map(Some)
            .ok_or_else(|| ChatError::not_found("provider", provider_id))
    }

    async fn persist(&self, chat_id: &str, conversation: &Conversation) -> Result<(), ChatError> {
        self.store
            .update_conversation(chat_id, conversation)
            .await
            .map_err(ChatError::Storage)
    }

    async fn pipeline_for(
        &self,
        chat: &Chat,
        provider: Option<&Provider>,
    ) -> Result<(HookPipeline, Vec<RegistryWarning>), ChatError> {
        let (attachments, mut warnings) = collect_attachments(self.store.as_ref(), chat, provider)
            .await
            .map_err(ChatError::Storage)?;
        let build = build_registry(&attachments, &self.loader)?;
        warnings.extend(build.warnings);
        for warning in &warnings {
            warn!(chat = %chat.id, "{warning}");
        }
        Ok((HookPipeline::new(build.registry), warnings))
    }

    /// Run one user turn for `chat_id`.
    ///
    /// The user message is persisted before any hook runs and stays in the
    /// history whatever happens afterwards. A failing hook stage leaves the
    /// conversation as it was before that stage.
    ///
    /// Inbound hooks run over the provider's view of the history plus the
    /// reply, and only the content of the last message they return is kept:
    /// it becomes the stored reply, which is then marked as shaped.
    /// Conversation metadata and any messages they add are discarded.
    #[instrument(skip(self, text), fields(chat = %chat_id))]
    pub async fn send(&self, chat_id: &str, text: &str) -> Result<SendOutcome, ChatError> {
        let turn = self.begin(chat_id, SendState::Busy)?;
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let chat = self.load_chat(chat_id).await?;
        let provider = self
            .load_provider(&chat)
            .await?
            .ok_or_else(|| ChatError::ProviderNotConfigured(chat_id.to_string()))?;
        let api_key = self.secrets.decrypt(&provider.encrypted_api_key)?;
        let settings = ProviderSettings::from_provider(&provider, api_key);

        let mut conversation = chat.conversation.clone();
        conversation.messages.push(Message::user(text));
        self.persist(chat_id, &conversation).await?;
        turn.set_state(SendState::UserMessageAppended);

        let (pipeline, warnings) = self.pipeline_for(&chat, Some(&provider)).await?;

        turn.set_state(SendState::LifecycleBeforeSend);
        conversation = pipeline.lifecycle(LifecycleEvent::BeforeSend, &conversation).await?;
        self.persist(chat_id, &conversation).await?;

        turn.set_state(SendState::OutboundHooksApplied);
        let outbound = pipeline.outbound(&conversation).await?;

        turn.set_state(SendState::ProviderCallInFlight);
        let client = self
            .providers
            .get_or_create(&settings, self.factory.as_ref())
            .map_err(ChatError::Provider)?;
        drop(settings);

        conversation.messages.push(Message::assistant(""));
        self.persist(chat_id, &conversation).await?;
        let reply = if provider.streaming {
            self.stream_reply(chat_id, client.as_ref(), &outbound, &mut conversation, &turn.token)
                .await?
        } else {
            self.complete_reply(chat_id, client.as_ref(), &outbound, &mut conversation, &turn.token)
                .await?
        };

        turn.set_state(SendState::InboundHooksApplied);
        let mut received = outbound;
        received.messages.extend(conversation.last_message().cloned());
        let received = pipeline.inbound(&received).await?;
        if let (Some(shaped), Some(reply_msg)) = (received.last_message(), conversation.messages.last_mut()) {
            reply_msg.content = shaped.content.clone();
            reply_msg.mark_inbound_shaped();
        }
        self.persist(chat_id, &conversation).await?;

        turn.set_state(SendState::LifecycleAfterReceive);
        conversation = pipeline.lifecycle(LifecycleEvent::AfterReceive, &conversation).await?;
        self.persist(chat_id, &conversation).await?;

        info!(
            messages = conversation.messages.len(),
            interrupted = reply.interrupted,
            warnings = warnings.len(),
            "Send complete"
        );
        Ok(SendOutcome { conversation, interrupted: reply.interrupted, warnings })
    }

    async fn stream_reply(
        &self,
        chat_id: &str,
        client: &dyn ProviderClient,
        outbound: &Conversation,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<Reply, ChatError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.interrupt(chat_id, conversation).await,
            opened = client.stream(&outbound.messages, cancel.clone()) => opened.map_err(ChatError::Provider)?,
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.interrupt(chat_id, conversation).await,
                next = stream.next() => match next {
                    Some(Ok(delta)) => {
                        if let Some(reply) = conversation.messages.last_mut() {
                            reply.content.push_str(&delta);
                        }
                        self.persist(chat_id, conversation).await?;
                    }
                    Some(Err(e)) => {
                        warn!(chat = %chat_id, error = %redact_sensitive_data(&format!("{e:#}")), "Provider stream failed");
                        return Err(ChatError::Provider(e));
                    }
                    None => break,
                },
            }
        }
        Ok(Reply { interrupted: false })
    }

    async fn complete_reply(
        &self,
        chat_id: &str,
        client: &dyn ProviderClient,
        outbound: &Conversation,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<Reply, ChatError> {
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.interrupt(chat_id, conversation).await,
            result = client.complete(&outbound.messages, cancel.clone()) => result.map_err(ChatError::Provider)?,
        };
        if let Some(reply) = conversation.messages.last_mut() {
            reply.content = text;
        }
        self.persist(chat_id, conversation).await?;
        Ok(Reply { interrupted: false })
    }

    async fn interrupt(&self, chat_id: &str, conversation: &mut Conversation) -> Result<Reply, ChatError> {
        if let Some(reply) = conversation.messages.last_mut() {
            reply.content.push_str(&self.interruption_marker);
        }
        self.persist(chat_id, conversation).await?;
        info!(chat = %chat_id, "Provider call interrupted");
        Ok(Reply { interrupted: true })
    }

    /// Open a chat session: run `onInit` hooks over the stored conversation
    /// and persist the result.
    #[instrument(skip(self), fields(chat = %chat_id))]
    pub async fn open_chat(&self, chat_id: &str) -> Result<StageOutcome, ChatError> {
        let _turn = self.begin(chat_id, SendState::Opening)?;
        let chat = self.load_chat(chat_id).await?;
        let provider = self.load_provider(&chat).await?;
        let (pipeline, warnings) = self.pipeline_for(&chat, provider.as_ref()).await?;

        let conversation = pipeline.lifecycle(LifecycleEvent::OnInit, &chat.conversation).await?;
        if conversation != chat.conversation {
            self.persist(chat_id, &conversation).await?;
        }
        Ok(StageOutcome { conversation, warnings })
    }

    /// Run one stage over the stored conversation without persisting.
    pub async fn preview_stage(&self, chat_id: &str, stage: Stage) -> Result<StageOutcome, ChatError> {
        let chat = self.load_chat(chat_id).await?;
        self.run_over_stored(&chat, stage).await
    }

    async fn run_over_stored(&self, chat: &Chat, stage: Stage) -> Result<StageOutcome, ChatError> {
        let provider = self.load_provider(chat).await?;
        let (pipeline, warnings) = self.pipeline_for(chat, provider.as_ref()).await?;

        let conversation = match stage {
            Stage::Outbound => pipeline.outbound(&chat.conversation).await?,
            Stage::Inbound => pipeline.inbound(&chat.conversation).await?,
            Stage::Lifecycle(event) => pipeline.lifecycle(event, &chat.conversation).await?,
        };
        Ok(StageOutcome { conversation, warnings })
    }

    /// The conversation as it should be rendered: inbound hooks applied to
    /// the stored history, nothing written back.
    ///
    /// Replies already shaped when they were received are shown as stored,
    /// so inbound hooks never apply to the same reply twice.
    pub async fn display_conversation(&self, chat_id: &str) -> Result<StageOutcome, ChatError> {
        let chat = self.load_chat(chat_id).await?;
        let mut view = self.run_over_stored(&chat, Stage::Inbound).await?;

        let shaped: HashMap<&str, &Message> = chat
            .conversation
            .messages
            .iter()
            .filter(|m| m.is_inbound_shaped())
            .map(|m| (m.id.as_str(), m))
            .collect();
        for message in &mut view.conversation.messages {
            if let Some(stored) = shaped.get(message.id.as_str()) {
                *message = (*stored).clone();
            }
        }
        Ok(view)
    }

    /// Remove one message from a chat's history. Rejected while a turn is
    /// running for the chat.
    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool, ChatError> {
        let _turn = self.begin(chat_id, SendState::Busy)?;
        let mut conversation = self.load_chat(chat_id).await?.conversation;
        if !conversation.remove_message(message_id) {
            return Ok(false);
        }
        self.persist(chat_id, &conversation).await?;
        debug!(chat = %chat_id, message = %message_id, "Deleted message");
        Ok(true)
    }

    /// Merged config of every plugin attached to the chat, in registry
    /// order.
    pub async fn effective_configs(&self, chat_id: &str) -> Result<ConfigReport, ChatError> {
        let chat = self.load_chat(chat_id).await?;
        let provider = self.load_provider(&chat).await?;
        let (attachments, mut warnings) = collect_attachments(self.store.as_ref(), &chat, provider.as_ref())
            .await
            .map_err(ChatError::Storage)?;

        let mut configs = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            let record = &attachment.record;
            match self.loader.load_record(record) {
                Ok(descriptor) => configs.push(PluginConfigView {
                    plugin_id: record.id.clone(),
                    config: attachment.effective_config(&descriptor.config_schema)?,
                    plugin_name: descriptor.name,
                }),
                Err(error) => warnings.push(RegistryWarning { plugin_id: record.id.clone(), error }),
            }
        }
        Ok(ConfigReport { configs, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use parley_config::SandboxConfig;
    use parley_core::{
        ConfigValue, DecryptionError, LoadError, PluginAttachments, PluginRecord, Prefab, ProviderKind, Role,
    };
    use parley_store::InMemoryStore;
    use serde_json::json;
    use tokio::sync::Semaphore;

    use crate::provider::TextStream;

    const STAGES: &str = r#"
        fn before(chat, config, caps) { chat.metadata.before = true; chat }

        fn outbound(chat, config, caps) {
            chat.messages.insert(0, #{ role: "system", content: config.persona });
            chat
        }

        fn inbound(chat, config, caps) {
            let last = chat.messages.len() - 1;
            chat.messages[last].content = chat.messages[last].content.to_upper();
            chat
        }

        fn after(chat, config, caps) { chat.metadata.turns = chat.messages.len(); chat }

        #{
            name: "Stages",
            configSchema: #{ persona: #{ "type": "string", "default": "Be brief." } },
            outboundHooks: [ #{ order: 0, handler: Fn("outbound") } ],
            inboundHooks: [ #{ order: 0, handler: Fn("inbound") } ],
            anyHooks: [
                #{ event: "beforeSend", handler: Fn("before") },
                #{ event: "afterReceive", handler: Fn("after") },
            ],
        }
    "#;

    const FLAKY: &str = r#"
        fn a(chat, config, caps) { chat.metadata.a = true; chat }
        fn b(chat, config, caps) { chat.metadata.b = true; chat }
        fn c(chat, config, caps) { throw "third hook failed"; }
        fn d(chat, config, caps) { chat.metadata.d = true; chat }

        #{
            name: "Flaky",
            configSchema: #{},
            anyHooks: [
                #{ event: "beforeSend", order: 1, handler: Fn("a") },
                #{ event: "beforeSend", order: 2, handler: Fn("b") },
                #{ event: "beforeSend", order: 3, handler: Fn("c") },
                #{ event: "beforeSend", order: 4, handler: Fn("d") },
            ],
        }
    "#;

    const GREETER: &str = r#"
        fn greet(chat, config, caps) {
            if chat.messages.len() == 0 {
                chat.messages.push(#{ role: "assistant", content: "Welcome back" });
            }
            chat
        }

        fn shout(chat, config, caps) {
            for i in 0..chat.messages.len() {
                chat.messages[i].content = chat.messages[i].content.to_upper();
            }
            chat
        }

        #{
            name: "Greeter",
            configSchema: #{},
            inboundHooks: [ #{ order: 0, handler: Fn("shout") } ],
            anyHooks: [ #{ event: "onInit", handler: Fn("greet") } ],
        }
    "#;

    const PREFIX: &str = r#"
        fn tag(chat, config, caps) {
            let last = chat.messages.len() - 1;
            chat.messages[last].content = "[T] " + chat.messages[last].content;
            chat
        }

        #{
            name: "Prefix",
            configSchema: #{},
            inboundHooks: [ #{ order: 0, handler: Fn("tag") } ],
        }
    "#;

    const FOOTNOTE: &str = r#"
        fn annotate(chat, config, caps) {
            chat.metadata.annotated = true;
            chat.messages.push(#{ role: "assistant", content: "[footnote]" });
            chat
        }

        #{
            name: "Footnote",
            configSchema: #{},
            inboundHooks: [ #{ order: 0, handler: Fn("annotate") } ],
        }
    "#;

    const BROKEN_INBOUND: &str = r#"
        fn explode(chat, config, caps) { throw "inbound failed"; }

        #{
            name: "Broken",
            configSchema: #{},
            inboundHooks: [ #{ order: 0, handler: Fn("explode") } ],
        }
    "#;

    #[derive(Default)]
    struct Scripted {
        chunks: Vec<&'static str>,
        hold_open: bool,
        fail_after: bool,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl ProviderClient for Scripted {
        async fn complete(&self, messages: &[Message], _: CancellationToken) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.chunks.concat())
        }

        async fn stream(&self, messages: &[Message], _: CancellationToken) -> Result<TextStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut items: Vec<Result<String>> = self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            if self.fail_after {
                items.push(Err(anyhow!("connection reset")));
            }
            let head = futures::stream::iter(items);
            if self.hold_open {
                Ok(head.chain(futures::stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    struct Fixed(Arc<Scripted>);

    impl ProviderFactory for Fixed {
        fn create(&self, _: &ProviderSettings) -> Result<Arc<dyn ProviderClient>> {
            let client: Arc<dyn ProviderClient> = self.0.clone();
            Ok(client)
        }
    }

    /// Identity secrets, except that `"locked"` never decrypts.
    struct Secrets;

    impl SecretStore for Secrets {
        fn encrypt(&self, plaintext: &str) -> Result<String, DecryptionError> {
            Ok(plaintext.to_string())
        }

        fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError> {
            match ciphertext {
                "locked" => Err(DecryptionError::BadPassword),
                other => Ok(other.to_string()),
            }
        }
    }

    /// Store whose `get_chat` waits for a permit, holding a turn in its
    /// first checks until the test releases it.
    struct Gated {
        inner: Arc<InMemoryStore>,
        gate: Semaphore,
    }

    #[async_trait]
    impl ChatStore for Gated {
        async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>> {
            self.inner.get_plugin(id).await
        }
        async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
            self.inner.list_plugins().await
        }
        async fn put_plugin(&self, record: &PluginRecord) -> Result<()> {
            self.inner.put_plugin(record).await
        }
        async fn delete_plugin(&self, id: &str) -> Result<bool> {
            self.inner.delete_plugin(id).await
        }
        async fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
            self.inner.get_provider(id).await
        }
        async fn list_providers(&self) -> Result<Vec<Provider>> {
            self.inner.list_providers().await
        }
        async fn put_provider(&self, provider: &Provider) -> Result<()> {
            self.inner.put_provider(provider).await
        }
        async fn get_prefab(&self, id: &str) -> Result<Option<Prefab>> {
            self.inner.get_prefab(id).await
        }
        async fn list_prefabs(&self) -> Result<Vec<Prefab>> {
            self.inner.list_prefabs().await
        }
        async fn put_prefab(&self, prefab: &Prefab) -> Result<()> {
            self.inner.put_prefab(prefab).await
        }
        async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
            let _permit = self.gate.acquire().await?;
            self.inner.get_chat(id).await
        }
        async fn list_chats(&self) -> Result<Vec<Chat>> {
            self.inner.list_chats().await
        }
        async fn put_chat(&self, chat: &Chat) -> Result<()> {
            self.inner.put_chat(chat).await
        }
        async fn delete_chat(&self, id: &str) -> Result<bool> {
            self.inner.delete_chat(id).await
        }
        async fn update_conversation(&self, chat_id: &str, conversation: &Conversation) -> Result<()> {
            self.inner.update_conversation(chat_id, conversation).await
        }
        async fn get_kv(&self, category: &str, key: &str) -> Result<Option<serde_json::Value>> {
            self.inner.get_kv(category, key).await
        }
        async fn put_kv(&self, category: &str, key: &str, value: serde_json::Value) -> Result<()> {
            self.inner.put_kv(category, key, value).await
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        orchestrator: Arc<Orchestrator>,
        provider: Arc<Scripted>,
        chat_id: String,
    }

    async fn harness(provider: Scripted, streaming: bool, plugins: &[(&str, &str)]) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let loader = PluginLoader::rhai(&SandboxConfig::default());

        let mut attachments = PluginAttachments::new();
        for (id, source) in plugins {
            let record = loader.record_from_source(*id, *source, Vec::new()).unwrap();
            store.put_plugin(&record).await.unwrap();
            attachments.insert(*id, ConfigValue::new());
        }
        store
            .put_provider(&Provider {
                id: "prov".into(),
                name: "Scripted".into(),
                description: String::new(),
                tags: Vec::new(),
                kind: ProviderKind::OpenAi,
                base_url: String::new(),
                encrypted_api_key: "sk-test".into(),
                model: "test-model".into(),
                streaming,
                settings: Default::default(),
                plugins: attachments,
            })
            .await
            .unwrap();

        let mut chat = Chat::new("test");
        chat.provider_id = Some("prov".into());
        store.put_chat(&chat).await.unwrap();

        let provider = Arc::new(provider);
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(Secrets),
            loader,
            Arc::new(Fixed(provider.clone())),
        );
        Harness {
            store,
            orchestrator: Arc::new(orchestrator),
            provider,
            chat_id: chat.id,
        }
    }

    async fn stored(h: &Harness) -> Conversation {
        h.store.get_chat(&h.chat_id).await.unwrap().unwrap().conversation
    }

    #[tokio::test]
    async fn streaming_send_runs_every_stage() {
        let h = harness(
            Scripted { chunks: vec!["hello", " world"], ..Default::default() },
            true,
            &[("stages", STAGES)],
        )
        .await;

        let outcome = h.orchestrator.send(&h.chat_id, "hi").await.unwrap();
        assert!(!outcome.interrupted);
        assert!(outcome.warnings.is_empty());

        let messages = &outcome.conversation.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "HELLO WORLD");
        assert_eq!(outcome.conversation.metadata["before"], json!(true));
        assert_eq!(outcome.conversation.metadata["turns"], json!(2));

        // The system prompt only exists on the outbound copy.
        let seen = h.provider.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][0].content, "Be brief.");

        assert_eq!(stored(&h).await, outcome.conversation);
        assert_eq!(h.orchestrator.state(&h.chat_id), SendState::Idle);
    }

    #[tokio::test]
    async fn single_shot_send_uses_complete() {
        let h = harness(Scripted { chunks: vec!["done"], ..Default::default() }, false, &[]).await;
        let outcome = h.orchestrator.send(&h.chat_id, "go").await.unwrap();
        assert_eq!(outcome.conversation.messages[1].content, "done");
    }

    #[tokio::test]
    async fn cancelling_mid_stream_marks_the_reply() {
        let h = harness(
            Scripted { chunks: vec!["Hel", "lo"], hold_open: true, ..Default::default() },
            true,
            &[],
        )
        .await;

        let orchestrator = Arc::clone(&h.orchestrator);
        let chat_id = h.chat_id.clone();
        let task = tokio::spawn(async move { orchestrator.send(&chat_id, "hi").await });

        for _ in 0..400 {
            let partial = stored(&h).await.messages.get(1).map(|m| m.content.clone());
            if partial.as_deref() == Some("Hello") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.orchestrator.state(&h.chat_id), SendState::ProviderCallInFlight);
        assert!(matches!(
            h.orchestrator.send(&h.chat_id, "again").await,
            Err(ChatError::SendInFlight(_))
        ));

        assert!(h.orchestrator.cancel(&h.chat_id));
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.conversation.messages[1].content, "Hello\n\n(interrupted)");
        assert_eq!(stored(&h).await.messages[1].content, "Hello\n\n(interrupted)");

        assert_eq!(h.orchestrator.state(&h.chat_id), SendState::Idle);
        assert!(!h.orchestrator.cancel(&h.chat_id));
    }

    #[tokio::test]
    async fn failing_stage_commits_pre_stage_snapshot() {
        let h = harness(Scripted { chunks: vec!["unused"], ..Default::default() }, true, &[("flaky", FLAKY)]).await;

        let err = h.orchestrator.send(&h.chat_id, "hi").await.unwrap_err();
        let ChatError::HookExecution(err) = err else {
            panic!("expected a hook failure, got {err:?}");
        };
        assert_eq!(err.plugin_id, "flaky");
        assert_eq!(err.stage, Stage::Lifecycle(LifecycleEvent::BeforeSend));

        let conversation = stored(&h).await;
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "hi");
        assert!(conversation.metadata.is_empty());
        assert!(h.provider.seen.lock().unwrap().is_empty());
        assert_eq!(h.orchestrator.state(&h.chat_id), SendState::Idle);
    }

    #[tokio::test]
    async fn failing_inbound_stage_keeps_the_raw_reply() {
        let h = harness(
            Scripted { chunks: vec!["partial ", "reply"], ..Default::default() },
            true,
            &[("broken", BROKEN_INBOUND)],
        )
        .await;

        let err = h.orchestrator.send(&h.chat_id, "hi").await.unwrap_err();
        let ChatError::HookExecution(err) = err else {
            panic!("expected a hook failure, got {err:?}");
        };
        assert_eq!(err.stage, Stage::Inbound);

        let conversation = stored(&h).await;
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].content, "partial reply");
        assert!(!conversation.messages[1].is_inbound_shaped());
        assert_eq!(h.orchestrator.state(&h.chat_id), SendState::Idle);
    }

    #[tokio::test]
    async fn inbound_stage_keeps_only_the_last_content() {
        let h = harness(
            Scripted { chunks: vec!["the answer"], ..Default::default() },
            true,
            &[("footnote", FOOTNOTE)],
        )
        .await;

        let outcome = h.orchestrator.send(&h.chat_id, "hi").await.unwrap();
        let messages = &outcome.conversation.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "[footnote]");
        assert!(!outcome.conversation.metadata.contains_key("annotated"));
        assert_eq!(stored(&h).await, outcome.conversation);
    }

    #[tokio::test]
    async fn display_view_does_not_reshape_received_replies() {
        let h = harness(
            Scripted { chunks: vec!["the answer"], ..Default::default() },
            true,
            &[("prefix", PREFIX)],
        )
        .await;

        let outcome = h.orchestrator.send(&h.chat_id, "hi").await.unwrap();
        assert_eq!(outcome.conversation.messages[1].content, "[T] the answer");
        assert!(outcome.conversation.messages[1].is_inbound_shaped());

        let view = h.orchestrator.display_conversation(&h.chat_id).await.unwrap();
        assert_eq!(view.conversation.messages[0].content, "hi");
        assert_eq!(view.conversation.messages[1].content, "[T] the answer");

        // Messages that never passed the inbound stage are still shaped for display.
        let mut conversation = stored(&h).await;
        conversation.messages.push(Message::assistant("note"));
        h.store.update_conversation(&h.chat_id, &conversation).await.unwrap();

        let view = h.orchestrator.display_conversation(&h.chat_id).await.unwrap();
        assert_eq!(view.conversation.messages[1].content, "[T] the answer");
        assert_eq!(view.conversation.messages[2].content, "[T] note");
        assert_eq!(stored(&h).await.messages[2].content, "note");
    }

    #[tokio::test]
    async fn slot_reports_busy_before_the_user_message_lands() {
        let h = harness(Scripted { chunks: vec!["ok"], ..Default::default() }, true, &[]).await;
        let gated = Arc::new(Gated { inner: h.store.clone(), gate: Semaphore::new(0) });
        let orchestrator = Arc::new(Orchestrator::new(
            gated.clone(),
            Arc::new(Secrets),
            PluginLoader::rhai(&SandboxConfig::default()),
            Arc::new(Fixed(h.provider.clone())),
        ));

        let task = {
            let orchestrator = Arc::clone(&orchestrator);
            let chat_id = h.chat_id.clone();
            tokio::spawn(async move { orchestrator.send(&chat_id, "hi").await })
        };
        for _ in 0..400 {
            if orchestrator.state(&h.chat_id) != SendState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(orchestrator.state(&h.chat_id), SendState::Busy);
        assert!(matches!(
            orchestrator.delete_message(&h.chat_id, "any").await,
            Err(ChatError::SendInFlight(_))
        ));
        assert!(stored(&h).await.messages.is_empty());

        gated.gate.add_permits(1);
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.conversation.messages[1].content, "ok");
        assert_eq!(orchestrator.state(&h.chat_id), SendState::Idle);
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_reply() {
        let h = harness(
            Scripted { chunks: vec!["par"], fail_after: true, ..Default::default() },
            true,
            &[],
        )
        .await;

        let err = h.orchestrator.send(&h.chat_id, "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::Provider(_)));

        let conversation = stored(&h).await;
        assert_eq!(conversation.messages[0].content, "hi");
        assert_eq!(conversation.messages[1].content, "par");
    }

    #[tokio::test]
    async fn bad_key_aborts_before_any_write() {
        let h = harness(Scripted::default(), true, &[]).await;
        let mut provider = h.store.get_provider("prov").await.unwrap().unwrap();
        provider.encrypted_api_key = "locked".into();
        h.store.put_provider(&provider).await.unwrap();

        let err = h.orchestrator.send(&h.chat_id, "hi").await.unwrap_err();
        assert!(err.requires_reauth());
        assert!(stored(&h).await.messages.is_empty());
    }

    #[tokio::test]
    async fn rejects_blank_input_and_missing_provider() {
        let h = harness(Scripted::default(), true, &[]).await;
        assert!(matches!(
            h.orchestrator.send(&h.chat_id, "   ").await,
            Err(ChatError::EmptyInput)
        ));

        let loose = Chat::new("no provider");
        h.store.put_chat(&loose).await.unwrap();
        assert!(matches!(
            h.orchestrator.send(&loose.id, "hi").await,
            Err(ChatError::ProviderNotConfigured(_))
        ));
        assert!(h.orchestrator.send("missing", "hi").await.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn open_chat_runs_on_init_once() {
        let h = harness(Scripted::default(), true, &[("greeter", GREETER)]).await;

        let opened = h.orchestrator.open_chat(&h.chat_id).await.unwrap();
        assert_eq!(opened.conversation.messages.len(), 1);
        assert_eq!(stored(&h).await.messages[0].content, "Welcome back");

        let reopened = h.orchestrator.open_chat(&h.chat_id).await.unwrap();
        assert_eq!(reopened.conversation.messages.len(), 1);

        // The display view applies inbound hooks without writing them back.
        let view = h.orchestrator.display_conversation(&h.chat_id).await.unwrap();
        assert_eq!(view.conversation.messages[0].content, "WELCOME BACK");
        assert_eq!(stored(&h).await.messages[0].content, "Welcome back");
    }

    #[tokio::test]
    async fn delete_message_rewrites_history() {
        let h = harness(Scripted { chunks: vec!["ok"], ..Default::default() }, true, &[]).await;
        let outcome = h.orchestrator.send(&h.chat_id, "hi").await.unwrap();
        let user_id = outcome.conversation.messages[0].id.clone();

        assert!(h.orchestrator.delete_message(&h.chat_id, &user_id).await.unwrap());
        assert!(!h.orchestrator.delete_message(&h.chat_id, &user_id).await.unwrap());

        let conversation = stored(&h).await;
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "ok");
    }

    #[tokio::test]
    async fn effective_configs_follow_precedence() {
        let h = harness(Scripted::default(), true, &[("stages", STAGES)]).await;

        let mut chat = h.store.get_chat(&h.chat_id).await.unwrap().unwrap();
        chat.plugins
            .insert("stages", json!({ "persona": "Chat persona" }).as_object().cloned().unwrap());
        chat.plugins.insert("ghost", ConfigValue::new());
        h.store.put_chat(&chat).await.unwrap();

        let report = h.orchestrator.effective_configs(&h.chat_id).await.unwrap();
        assert_eq!(report.configs.len(), 1);
        assert_eq!(report.configs[0].plugin_name, "Stages");
        assert_eq!(report.configs[0].config["persona"], json!("Chat persona"));

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].plugin_id, "ghost");
        assert!(matches!(report.warnings[0].error, LoadError::Missing(_)));
    }
}
