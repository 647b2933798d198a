//! Provider-handle cache.
//!
//! Clients are keyed by a hash of the settings that shape them, so editing a
//! provider's key or URL yields a fresh client while unchanged providers
//! reuse theirs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::provider::{ProviderClient, ProviderFactory, ProviderSettings};

const IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_CLIENTS: u64 = 64;

pub struct ProviderCache {
    clients: Cache<String, Arc<dyn ProviderClient>>,
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderCache {
    pub fn new() -> Self {
        Self {
            clients: Cache::builder()
                .max_capacity(MAX_CLIENTS)
                .time_to_idle(IDLE_TTL)
                .build(),
        }
    }

    /// Structural hash of `settings`. Fields are length-prefixed so that
    /// shifting text between fields changes the key.
    pub fn key(settings: &ProviderSettings) -> String {
        let mut hasher = Sha256::new();
        for field in [
            settings.kind.as_str(),
            settings.base_url.as_str(),
            settings.api_key.as_str(),
            settings.model.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get_or_create(
        &self,
        settings: &ProviderSettings,
        factory: &dyn ProviderFactory,
    ) -> Result<Arc<dyn ProviderClient>> {
        let key = Self::key(settings);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client);
        }
        debug!(kind = %settings.kind, model = %settings.model, "Creating provider client");
        let client = factory.create(settings)?;
        self.clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn evict(&self, settings: &ProviderSettings) {
        self.clients.invalidate(&Self::key(settings));
    }

    pub fn clear(&self) {
        self.clients.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TextStream;
    use async_trait::async_trait;
    use parley_core::{Message, ProviderKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;
    use zeroize::Zeroizing;

    struct Echo;

    #[async_trait]
    impl ProviderClient for Echo {
        async fn complete(&self, _: &[Message], _: CancellationToken) -> Result<String> {
            Ok(String::new())
        }

        async fn stream(&self, _: &[Message], _: CancellationToken) -> Result<TextStream> {
            anyhow::bail!("not streaming")
        }
    }

    #[derive(Default)]
    struct CountingFactory(AtomicUsize);

    impl ProviderFactory for CountingFactory {
        fn create(&self, _: &ProviderSettings) -> Result<Arc<dyn ProviderClient>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Echo))
        }
    }

    fn settings(key: &str) -> ProviderSettings {
        ProviderSettings {
            kind: ProviderKind::Gemini,
            base_url: "https://example.test".into(),
            api_key: Zeroizing::new(key.into()),
            model: "m".into(),
        }
    }

    #[test]
    fn same_settings_share_a_client() {
        let cache = ProviderCache::new();
        let factory = CountingFactory::default();

        cache.get_or_create(&settings("a"), &factory).unwrap();
        cache.get_or_create(&settings("a"), &factory).unwrap();
        assert_eq!(factory.0.load(Ordering::SeqCst), 1);

        cache.get_or_create(&settings("b"), &factory).unwrap();
        assert_eq!(factory.0.load(Ordering::SeqCst), 2);

        cache.evict(&settings("a"));
        cache.get_or_create(&settings("a"), &factory).unwrap();
        assert_eq!(factory.0.load(Ordering::SeqCst), 3);

        cache.clear();
        cache.get_or_create(&settings("b"), &factory).unwrap();
        assert_eq!(factory.0.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn key_depends_on_field_boundaries() {
        let mut a = settings("ab");
        a.model = "c".into();
        let mut b = settings("a");
        b.model = "bc".into();
        assert_ne!(ProviderCache::key(&a), ProviderCache::key(&b));
    }
}
