use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parley_core::{Chat, ChatStore, Conversation, PluginRecord, Prefab, Provider};
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    plugins: HashMap<String, PluginRecord>,
    providers: HashMap<String, Provider>,
    prefabs: HashMap<String, Prefab>,
    chats: HashMap<String, Chat>,
    kv: HashMap<(String, String), Value>,
}

/// Process-local store, for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_name<T: Clone>(items: &HashMap<String, T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut out: Vec<T> = items.values().cloned().collect();
    out.sort_by(|a, b| name(a).cmp(name(b)));
    out
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>> {
        Ok(self.tables.read().await.plugins.get(id).cloned())
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        Ok(sorted_by_name(&self.tables.read().await.plugins, |p| p.name.as_str()))
    }

    async fn put_plugin(&self, record: &PluginRecord) -> Result<()> {
        self.tables.write().await.plugins.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_plugin(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().await.plugins.remove(id).is_some())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
        Ok(self.tables.read().await.providers.get(id).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<Provider>> {
        Ok(sorted_by_name(&self.tables.read().await.providers, |p| p.name.as_str()))
    }

    async fn put_provider(&self, provider: &Provider) -> Result<()> {
        self.tables.write().await.providers.insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn get_prefab(&self, id: &str) -> Result<Option<Prefab>> {
        Ok(self.tables.read().await.prefabs.get(id).cloned())
    }

    async fn list_prefabs(&self) -> Result<Vec<Prefab>> {
        Ok(sorted_by_name(&self.tables.read().await.prefabs, |p| p.name.as_str()))
    }

    async fn put_prefab(&self, prefab: &Prefab) -> Result<()> {
        self.tables.write().await.prefabs.insert(prefab.id.clone(), prefab.clone());
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        Ok(self.tables.read().await.chats.get(id).cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self.tables.read().await.chats.values().cloned().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn put_chat(&self, chat: &Chat) -> Result<()> {
        self.tables.write().await.chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().await.chats.remove(id).is_some())
    }

    async fn update_conversation(&self, chat_id: &str, conversation: &Conversation) -> Result<()> {
        let mut tables = self.tables.write().await;
        let Some(chat) = tables.chats.get_mut(chat_id) else {
            bail!("chat '{chat_id}' not found");
        };
        chat.conversation = conversation.clone();
        chat.touch();
        Ok(())
    }

    async fn get_kv(&self, category: &str, key: &str) -> Result<Option<Value>> {
        let tables = self.tables.read().await;
        Ok(tables.kv.get(&(category.to_string(), key.to_string())).cloned())
    }

    async fn put_kv(&self, category: &str, key: &str, value: Value) -> Result<()> {
        self.tables
            .write()
            .await
            .kv
            .insert((category.to_string(), key.to_string()), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Message;

    #[tokio::test]
    async fn update_conversation_touches_chat() {
        let store = InMemoryStore::new();
        let chat = Chat::new("c");
        store.put_chat(&chat).await.unwrap();

        let conv = Conversation::with_messages(vec![Message::user("hi")]);
        store.update_conversation(&chat.id, &conv).await.unwrap();

        let stored = store.get_chat(&chat.id).await.unwrap().unwrap();
        assert_eq!(stored.conversation, conv);
        assert!(stored.updated_at >= chat.updated_at);
        assert!(store.update_conversation("missing", &conv).await.is_err());
    }

    #[tokio::test]
    async fn kv_is_scoped_by_category() {
        let store = InMemoryStore::new();
        store.put_kv("generic", "k", serde_json::json!(1)).await.unwrap();
        assert_eq!(store.get_kv("generic", "k").await.unwrap(), Some(serde_json::json!(1)));
        assert_eq!(store.get_kv("other", "k").await.unwrap(), None);
    }
}
