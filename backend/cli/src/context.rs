//! Shared state for one CLI invocation: settings, logging, the SQLite store
//! and the plugin loader.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use parley_chat::{Orchestrator, ProviderClient, ProviderFactory, ProviderSettings};
use parley_config::{AppConfig, config_dir, config_file_path, load_and_prepare};
use parley_logging::{LogGuard, init_logger};
use parley_plugins::PluginLoader;
use parley_security::{SecretVault, open_vault};
use parley_store::SqliteStore;
use tracing::info;

/// Env var holding the password that unlocks encrypted API keys.
pub const PASSWORD_ENV: &str = "PARLEY_PASSWORD";

pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub loader: PluginLoader,
    _log: LogGuard,
}

impl AppContext {
    pub async fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let dir = config_dir();
        let path = config_path.unwrap_or_else(|| config_file_path(&dir));
        let config = load_and_prepare(&path)
            .await
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        let log = init_logger(Some(&config.log_dir(&dir)), &config.logging.level)?;

        let db = config.db_path(&dir);
        let store = SqliteStore::open(&db)
            .with_context(|| format!("Failed to open database {}", db.display()))?;
        info!(settings = %path.display(), db = %db.display(), "parley ready");

        Ok(Self {
            loader: PluginLoader::rhai(&config.sandbox),
            store: Arc::new(store),
            config,
            _log: log,
        })
    }

    /// Unlock the secret vault, setting it up on first use.
    pub async fn vault(&self) -> Result<SecretVault> {
        let password = std::env::var(PASSWORD_ENV).ok();
        open_vault(
            self.store.as_ref(),
            self.config.secrets.mode,
            &self.config.secrets.kdf,
            password.as_deref(),
        )
        .await
        .map_err(|e| {
            if e.requires_reauth() {
                anyhow!("{e} (set {PASSWORD_ENV})")
            } else {
                anyhow!(e)
            }
        })
    }

    /// Orchestrator for hook-only operations. The CLI never sends, so it
    /// gets no provider and never decrypts anything.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            Arc::new(SecretVault::raw()),
            self.loader.clone(),
            Arc::new(NoProviders),
        )
        .with_chat_config(&self.config.chat)
    }
}

struct NoProviders;

impl ProviderFactory for NoProviders {
    fn create(&self, settings: &ProviderSettings) -> Result<Arc<dyn ProviderClient>> {
        bail!("no {} client is available from the command line", settings.kind)
    }
}
