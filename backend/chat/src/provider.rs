//! Provider call collaborator.
//!
//! The orchestrator only needs text in and text out; wire formats live in
//! whatever implements [`ProviderClient`].

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use parley_core::{Message, Provider, ProviderKind};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

/// Incremental text output of a streaming call.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Single-shot completion of `messages`.
    async fn complete(&self, messages: &[Message], cancel: CancellationToken) -> Result<String>;

    /// Streaming completion. Each item is a text increment.
    async fn stream(&self, messages: &[Message], cancel: CancellationToken) -> Result<TextStream>;
}

/// Builds clients from resolved settings.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, settings: &ProviderSettings) -> Result<Arc<dyn ProviderClient>>;
}

/// Everything needed to talk to one provider endpoint, with the API key
/// already decrypted.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Zeroizing<String>,
    pub model: String,
}

impl ProviderSettings {
    pub fn from_provider(provider: &Provider, api_key: String) -> Self {
        Self {
            kind: provider.kind,
            base_url: provider.effective_base_url().to_string(),
            api_key: Zeroizing::new(api_key),
            model: provider.model.clone(),
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}
