//! SQLite-backed durable store.
//!
//! Each entity table keeps the serialized record as a JSON document keyed by
//! id; `chats` also keeps `updated_at` as a column so listing can sort in
//! SQL. Conversation updates read and rewrite the chat document inside one
//! transaction, so each streaming checkpoint is a single small write.
use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parley_core::{Chat, ChatStore, Conversation, PluginRecord, Prefab, Provider};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS plugins (
        id   TEXT PRIMARY KEY,
        doc  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS providers (
        id   TEXT PRIMARY KEY,
        doc  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS prefabs (
        id   TEXT PRIMARY KEY,
        doc  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chats (
        id          TEXT PRIMARY KEY,
        doc         TEXT NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(updated_at);
    CREATE TABLE IF NOT EXISTS kv (
        category  TEXT NOT NULL,
        key       TEXT NOT NULL,
        value     TEXT NOT NULL,
        PRIMARY KEY (category, key)
    );";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL")?;
        conn.execute_batch(SCHEMA).context("Failed to initialize schema")?;

        info!("SqliteStore opened at {:?}", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    async fn get_doc<T: DeserializeOwned>(&self, table: &'static str, id: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().await;
        let doc: Option<String> = conn
            .query_row(&format!("SELECT doc FROM {table} WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).with_context(|| format!("Corrupt {table} row '{id}'")))
            .transpose()
    }

    async fn list_docs<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).context("Corrupt row"))
            .collect()
    }

    async fn put_doc<T: Serialize>(&self, table: &'static str, id: &str, doc: &T) -> Result<()> {
        let json = serde_json::to_string(doc)?;
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT OR REPLACE INTO {table} (id, doc) VALUES (?1, ?2)"),
            params![id, json],
        )?;
        debug!("Stored {table} {id}");
        Ok(())
    }

    async fn delete_doc(&self, table: &'static str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n = conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(n > 0)
    }
}

fn name_sorted<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>> {
        self.get_doc("plugins", id).await
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        let plugins = self.list_docs("SELECT doc FROM plugins").await?;
        Ok(name_sorted(plugins, |p: &PluginRecord| p.name.as_str()))
    }

    async fn put_plugin(&self, record: &PluginRecord) -> Result<()> {
        self.put_doc("plugins", &record.id, record).await
    }

    async fn delete_plugin(&self, id: &str) -> Result<bool> {
        self.delete_doc("plugins", id).await
    }

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
        self.get_doc("providers", id).await
    }

    async fn list_providers(&self) -> Result<Vec<Provider>> {
        let providers = self.list_docs("SELECT doc FROM providers").await?;
        Ok(name_sorted(providers, |p: &Provider| p.name.as_str()))
    }

    async fn put_provider(&self, provider: &Provider) -> Result<()> {
        self.put_doc("providers", &provider.id, provider).await
    }

    async fn get_prefab(&self, id: &str) -> Result<Option<Prefab>> {
        self.get_doc("prefabs", id).await
    }

    async fn list_prefabs(&self) -> Result<Vec<Prefab>> {
        let prefabs = self.list_docs("SELECT doc FROM prefabs").await?;
        Ok(name_sorted(prefabs, |p: &Prefab| p.name.as_str()))
    }

    async fn put_prefab(&self, prefab: &Prefab) -> Result<()> {
        self.put_doc("prefabs", &prefab.id, prefab).await
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        self.get_doc("chats", id).await
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        self.list_docs("SELECT doc FROM chats ORDER BY updated_at DESC").await
    }

    async fn put_chat(&self, chat: &Chat) -> Result<()> {
        let json = serde_json::to_string(chat)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO chats (id, doc, updated_at) VALUES (?1, ?2, ?3)",
            params![chat.id, json, chat.updated_at.timestamp_millis()],
        )?;
        debug!("Stored chat {}", chat.id);
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        self.delete_doc("chats", id).await
    }

    /// The read and the write share one lock and one transaction.
    async fn update_conversation(&self, chat_id: &str, conversation: &Conversation) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let doc: Option<String> = tx
            .query_row("SELECT doc FROM chats WHERE id = ?1", params![chat_id], |row| row.get(0))
            .optional()?;
        let Some(doc) = doc else {
            bail!("chat '{chat_id}' not found");
        };
        let mut chat: Chat =
            serde_json::from_str(&doc).with_context(|| format!("Corrupt chats row '{chat_id}'"))?;
        chat.conversation = conversation.clone();
        chat.touch();

        tx.execute(
            "UPDATE chats SET doc = ?2, updated_at = ?3 WHERE id = ?1",
            params![chat_id, serde_json::to_string(&chat)?, chat.updated_at.timestamp_millis()],
        )?;
        tx.commit()?;
        debug!("Updated conversation of chat {chat_id}");
        Ok(())
    }

    async fn get_kv(&self, category: &str, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE category = ?1 AND key = ?2",
                params![category, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn put_kv(&self, category: &str, key: &str, value: Value) -> Result<()> {
        let json = serde_json::to_string(&value)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv (category, key, value) VALUES (?1, ?2, ?3)",
            params![category, key, json],
        )?;
        Ok(())
    }
}
