use parley_core::{ChatError, ChatStore, HolderKind, HolderRef, PluginAttachments};
use tracing::info;

/// Merge a prefab's plugin attachments into a provider, prefab or chat.
///
/// Prefab entries replace same-id entries already on the target. Returns the
/// target's attachments after the merge.
pub async fn import_prefab(
    store: &dyn ChatStore,
    prefab_id: &str,
    target: &HolderRef,
) -> Result<PluginAttachments, ChatError> {
    let prefab = store
        .get_prefab(prefab_id)
        .await
        .map_err(ChatError::Storage)?
        .ok_or_else(|| ChatError::not_found("prefab", prefab_id))?;

    let merged = match target.kind {
        HolderKind::Provider => {
            let mut provider = store
                .get_provider(&target.id)
                .await
                .map_err(ChatError::Storage)?
                .ok_or_else(|| ChatError::not_found("provider", &target.id))?;
            provider.plugins.merge_from(&prefab.plugins);
            store.put_provider(&provider).await.map_err(ChatError::Storage)?;
            provider.plugins
        }
        HolderKind::Prefab => {
            let mut other = store
                .get_prefab(&target.id)
                .await
                .map_err(ChatError::Storage)?
                .ok_or_else(|| ChatError::not_found("prefab", &target.id))?;
            other.plugins.merge_from(&prefab.plugins);
            store.put_prefab(&other).await.map_err(ChatError::Storage)?;
            other.plugins
        }
        HolderKind::Chat => {
            let mut chat = store
                .get_chat(&target.id)
                .await
                .map_err(ChatError::Storage)?
                .ok_or_else(|| ChatError::not_found("chat", &target.id))?;
            chat.plugins.merge_from(&prefab.plugins);
            chat.touch();
            store.put_chat(&chat).await.map_err(ChatError::Storage)?;
            chat.plugins
        }
    };

    info!(prefab = prefab_id, target = %target.kind, id = %target.id, "Imported prefab");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use parley_core::{Chat, ConfigValue, Prefab};
    use serde_json::json;

    fn prefab(id: &str, entries: &[(&str, serde_json::Value)]) -> Prefab {
        let mut plugins = PluginAttachments::new();
        for (plugin_id, overrides) in entries {
            plugins.insert(*plugin_id, overrides.as_object().cloned().unwrap_or_default());
        }
        Prefab {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            tags: Vec::new(),
            plugins,
        }
    }

    #[tokio::test]
    async fn prefab_entries_replace_chat_entries() {
        let store = InMemoryStore::new();
        store
            .put_prefab(&prefab("writer", &[("tone", json!({ "style": "formal" })), ("cite", json!({}))]))
            .await
            .unwrap();

        let mut chat = Chat::new("draft");
        chat.plugins.insert("tone", json!({ "style": "casual" }).as_object().cloned().unwrap());
        chat.plugins.insert("own", ConfigValue::new());
        store.put_chat(&chat).await.unwrap();

        let merged = import_prefab(&store, "writer", &HolderRef::new(HolderKind::Chat, &chat.id))
            .await
            .unwrap();
        let ids: Vec<_> = merged.ids().collect();
        assert_eq!(ids, vec!["tone", "own", "cite"]);
        assert_eq!(merged.get("tone").unwrap()["style"], "formal");

        let stored = store.get_chat(&chat.id).await.unwrap().unwrap();
        assert_eq!(stored.plugins, merged);
    }

    #[tokio::test]
    async fn prefab_into_prefab() {
        let store = InMemoryStore::new();
        store.put_prefab(&prefab("base", &[("a", json!({}))])).await.unwrap();
        store.put_prefab(&prefab("target", &[("b", json!({}))])).await.unwrap();

        import_prefab(&store, "base", &HolderRef::new(HolderKind::Prefab, "target"))
            .await
            .unwrap();
        let target = store.get_prefab("target").await.unwrap().unwrap();
        assert!(target.plugins.contains("a"));
        assert!(target.plugins.contains("b"));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = InMemoryStore::new();
        let err = import_prefab(&store, "nope", &HolderRef::new(HolderKind::Chat, "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound { kind: "prefab", .. }));

        store.put_prefab(&prefab("base", &[])).await.unwrap();
        let err = import_prefab(&store, "base", &HolderRef::new(HolderKind::Provider, "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound { kind: "provider", .. }));
    }
}
