//! `parley provider ...`

use anyhow::{Result, bail};
use clap::Subcommand;
use parley_core::{ChatStore, ConfigValue, PluginAttachments, Provider, ProviderKind, SecretStore};
use uuid::Uuid;

use crate::context::AppContext;
use crate::output::{note_success, render_table};

/// Env var read when `--api-key` is not given.
const API_KEY_ENV: &str = "PARLEY_API_KEY";

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Register a provider. The API key is encrypted before it is stored.
    Add {
        name: String,
        /// openai or gemini
        #[arg(long)]
        kind: ProviderKind,
        #[arg(long)]
        model: String,
        /// Defaults to the kind's public endpoint
        #[arg(long)]
        base_url: Option<String>,
        /// Falls back to PARLEY_API_KEY
        #[arg(long)]
        api_key: Option<String>,
        /// Stream replies instead of waiting for the full text
        #[arg(long)]
        stream: bool,
        #[arg(long, default_value = "")]
        description: String,
        /// Plugin ids to attach
        #[arg(long = "plugin")]
        plugins: Vec<String>,
    },
    /// List providers
    List,
}

pub async fn run(ctx: &AppContext, cmd: ProviderCommands) -> Result<()> {
    match cmd {
        ProviderCommands::Add { name, kind, model, base_url, api_key, stream, description, plugins } => {
            let Some(api_key) = api_key.or_else(|| std::env::var(API_KEY_ENV).ok()) else {
                bail!("an API key is required (--api-key or {API_KEY_ENV})");
            };
            let attachments = attach_existing(ctx, &plugins).await?;
            let encrypted_api_key = ctx.vault().await?.encrypt(&api_key)?;

            let provider = Provider {
                id: Uuid::new_v4().to_string(),
                name,
                description,
                tags: Vec::new(),
                kind,
                base_url: base_url.unwrap_or_default(),
                encrypted_api_key,
                model,
                streaming: stream,
                settings: Default::default(),
                plugins: attachments,
            };
            ctx.store.put_provider(&provider).await?;
            note_success(&format!("Added provider '{}' as {}", provider.name, provider.id));
        }
        ProviderCommands::List => {
            let rows: Vec<Vec<String>> = ctx
                .store
                .list_providers()
                .await?
                .into_iter()
                .map(|p| {
                    vec![
                        p.id.clone(),
                        p.name.clone(),
                        p.kind.to_string(),
                        p.model.clone(),
                        p.effective_base_url().to_string(),
                        if p.streaming { "yes".into() } else { "no".into() },
                        p.plugins.ids().collect::<Vec<_>>().join(","),
                    ]
                })
                .collect();
            print!(
                "{}",
                render_table(&["ID", "NAME", "KIND", "MODEL", "URL", "STREAM", "PLUGINS"], &rows, 40)
            );
        }
    }
    Ok(())
}

/// Attachments for `ids`, failing on any id that is not stored.
pub async fn attach_existing(ctx: &AppContext, ids: &[String]) -> Result<PluginAttachments> {
    let mut attachments = PluginAttachments::new();
    for id in ids {
        if ctx.store.get_plugin(id).await?.is_none() {
            bail!("plugin '{id}' not found");
        }
        attachments.insert(id.as_str(), ConfigValue::new());
    }
    Ok(attachments)
}
