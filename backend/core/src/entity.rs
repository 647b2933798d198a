//! Stored records: plugins and the plugin-holder entities (providers,
//! prefabs, chats) that attach them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::schema::{ConfigSchema, ConfigValue};

/// A stored plugin. `source` is the only thing that determines hook
/// behaviour; the other descriptive fields are cached from the last load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: String,
    /// Hex digest of `source`.
    pub content_hash: String,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    /// Plugin-wide overrides, applied on top of schema defaults.
    #[serde(default)]
    pub global_config: ConfigValue,
}

/// "This plugin is enabled here, with these overrides."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginAttachment {
    pub plugin_id: String,
    #[serde(default)]
    pub overrides: ConfigValue,
}

/// Attachments held by a plugin-holder, keyed by plugin id, in insertion
/// order. Re-inserting an id replaces its overrides in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginAttachments(Vec<PluginAttachment>);

impl PluginAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, plugin_id: &str) -> Option<&ConfigValue> {
        self.0
            .iter()
            .find(|a| a.plugin_id == plugin_id)
            .map(|a| &a.overrides)
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.get(plugin_id).is_some()
    }

    pub fn insert(&mut self, plugin_id: impl Into<String>, overrides: ConfigValue) {
        let plugin_id = plugin_id.into();
        match self.0.iter_mut().find(|a| a.plugin_id == plugin_id) {
            Some(existing) => existing.overrides = overrides,
            None => self.0.push(PluginAttachment { plugin_id, overrides }),
        }
    }

    pub fn remove(&mut self, plugin_id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|a| a.plugin_id != plugin_id);
        self.0.len() != before
    }

    /// Copy every attachment of `other` into `self`; entries from `other`
    /// replace same-id entries.
    pub fn merge_from(&mut self, other: &PluginAttachments) {
        for attachment in other.iter() {
            self.insert(attachment.plugin_id.clone(), attachment.overrides.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginAttachment> {
        self.0.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|a| a.plugin_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PluginAttachment> for PluginAttachments {
    fn from_iter<I: IntoIterator<Item = PluginAttachment>>(iter: I) -> Self {
        let mut attachments = PluginAttachments::new();
        for a in iter {
            attachments.insert(a.plugin_id, a.overrides);
        }
        attachments
    }
}

/// Supported AI provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativeai.googleapis.com/v1beta",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unsupported provider type '{other}' (expected openai or gemini)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub kind: ProviderKind,
    /// Empty means the kind's default URL.
    #[serde(default)]
    pub base_url: String,
    /// Ciphertext produced by the secret store (plaintext in raw mode).
    pub encrypted_api_key: String,
    pub model: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub plugins: PluginAttachments,
}

impl Provider {
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.trim().is_empty() {
            self.kind.default_base_url()
        } else {
            &self.base_url
        }
    }
}

/// A reusable, named set of plugin attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefab {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub plugins: PluginAttachments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub conversation: Conversation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub plugins: PluginAttachments,
}

impl Chat {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tags: Vec::new(),
            provider_id: None,
            conversation: Conversation::new(),
            created_at: now,
            updated_at: now,
            plugins: PluginAttachments::new(),
        }
    }

    /// Start a new chat from a prefab: same name, tags and attachments, empty
    /// history.
    pub fn from_prefab(prefab: &Prefab) -> Self {
        let mut chat = Chat::new(prefab.name.clone());
        chat.tags = prefab.tags.clone();
        chat.plugins = prefab.plugins.clone();
        chat
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The closed set of entities that can hold plugin attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderKind {
    Provider,
    Prefab,
    Chat,
}

impl fmt::Display for HolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HolderKind::Provider => "provider",
            HolderKind::Prefab => "prefab",
            HolderKind::Chat => "chat",
        })
    }
}

impl std::str::FromStr for HolderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" => Ok(HolderKind::Provider),
            "prefab" => Ok(HolderKind::Prefab),
            "chat" => Ok(HolderKind::Chat),
            other => Err(format!("unknown plugin holder '{other}'")),
        }
    }
}

/// Addresses one plugin-holder record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderRef {
    pub kind: HolderKind,
    pub id: String,
}

impl HolderRef {
    pub fn new(kind: HolderKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(v: serde_json::Value) -> ConfigValue {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut a = PluginAttachments::new();
        a.insert("p1", overrides(json!({ "x": 1 })));
        a.insert("p2", ConfigValue::new());
        a.insert("p1", overrides(json!({ "x": 2 })));

        let ids: Vec<_> = a.ids().collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(a.get("p1").unwrap()["x"], 2);
    }

    #[test]
    fn merge_from_prefers_incoming() {
        let mut chat = PluginAttachments::new();
        chat.insert("keep", ConfigValue::new());
        chat.insert("shared", overrides(json!({ "v": "chat" })));

        let mut prefab = PluginAttachments::new();
        prefab.insert("shared", overrides(json!({ "v": "prefab" })));
        prefab.insert("extra", ConfigValue::new());

        chat.merge_from(&prefab);
        let ids: Vec<_> = chat.ids().collect();
        assert_eq!(ids, vec!["keep", "shared", "extra"]);
        assert_eq!(chat.get("shared").unwrap()["v"], "prefab");
    }

    #[test]
    fn attachments_serialize_as_list() {
        let mut a = PluginAttachments::new();
        a.insert("p1", ConfigValue::new());
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json, json!([{ "plugin_id": "p1", "overrides": {} }]));
    }

    #[test]
    fn chat_from_prefab_copies_attachments() {
        let mut plugins = PluginAttachments::new();
        plugins.insert("p", ConfigValue::new());
        let prefab = Prefab {
            id: "pf".into(),
            name: "Writer".into(),
            description: String::new(),
            tags: vec!["t".into()],
            plugins,
        };
        let chat = Chat::from_prefab(&prefab);
        assert_eq!(chat.name, "Writer");
        assert!(chat.plugins.contains("p"));
        assert!(chat.conversation.messages.is_empty());
    }

    #[test]
    fn provider_kind_parsing_and_urls() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!("anthropic".parse::<ProviderKind>().is_err());
        assert!(ProviderKind::Gemini.default_base_url().contains("googleapis"));
    }
}
