use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::conversation::Conversation;
use crate::entity::{Chat, PluginRecord, Prefab, Provider};
use crate::error::DecryptionError;

/// Storage collaborator. Errors are generic; the core surfaces them without
/// interpreting them.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>>;
    async fn list_plugins(&self) -> Result<Vec<PluginRecord>>;
    async fn put_plugin(&self, record: &PluginRecord) -> Result<()>;
    async fn delete_plugin(&self, id: &str) -> Result<bool>;

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>>;
    async fn list_providers(&self) -> Result<Vec<Provider>>;
    async fn put_provider(&self, provider: &Provider) -> Result<()>;

    async fn get_prefab(&self, id: &str) -> Result<Option<Prefab>>;
    async fn list_prefabs(&self) -> Result<Vec<Prefab>>;
    async fn put_prefab(&self, prefab: &Prefab) -> Result<()>;

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>>;
    /// Most recently updated first.
    async fn list_chats(&self) -> Result<Vec<Chat>>;
    async fn put_chat(&self, chat: &Chat) -> Result<()>;
    async fn delete_chat(&self, id: &str) -> Result<bool>;

    /// Replace a chat's conversation and bump its `updated_at`. Called at
    /// every checkpoint of a send, so it should be cheap.
    async fn update_conversation(&self, chat_id: &str, conversation: &Conversation) -> Result<()>;

    async fn get_kv(&self, category: &str, key: &str) -> Result<Option<Value>>;
    async fn put_kv(&self, category: &str, key: &str, value: Value) -> Result<()>;
}

/// Secret store collaborator used for provider API keys.
pub trait SecretStore: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, DecryptionError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError>;
}
