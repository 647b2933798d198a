//! `parley plugin ...`

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use parley_core::{ChatStore, PluginRecord};
use parley_plugins::check_content;
use uuid::Uuid;

use crate::context::AppContext;
use crate::output::{dim, note_success, render_table};
use crate::overrides;

#[derive(Subcommand)]
pub enum PluginCommands {
    /// Store a plugin from a script file, replacing the source of an existing id
    Add {
        /// Path to the plugin script
        file: PathBuf,
        /// Plugin id (defaults to a new UUID)
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List stored plugins
    List,
    /// Show a plugin's config schema and hooks
    Inspect { id: String },
    /// Set plugin-wide config overrides
    Config {
        id: String,
        /// KEY=VALUE; an empty value clears the key
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },
    /// Delete a stored plugin
    Remove { id: String },
}

pub async fn run(ctx: &AppContext, cmd: PluginCommands) -> Result<()> {
    match cmd {
        PluginCommands::Add { file, id, tags } => {
            let source = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

            let record = match ctx.store.get_plugin(&id).await? {
                Some(mut existing) => {
                    ctx.loader.update_source(&mut existing, source)?;
                    if !tags.is_empty() {
                        existing.tags = tags;
                    }
                    existing
                }
                None => ctx.loader.record_from_source(&id, source, tags)?,
            };
            ctx.store.put_plugin(&record).await?;
            note_success(&format!("Stored plugin '{}' as {}", record.name, record.id));
        }
        PluginCommands::List => {
            let rows: Vec<Vec<String>> = ctx
                .store
                .list_plugins()
                .await?
                .into_iter()
                .map(|p| {
                    vec![
                        p.id,
                        p.name,
                        p.config_schema.len().to_string(),
                        p.tags.join(","),
                        p.content_hash.chars().take(12).collect(),
                    ]
                })
                .collect();
            print!("{}", render_table(&["ID", "NAME", "OPTIONS", "TAGS", "HASH"], &rows, 40));
        }
        PluginCommands::Inspect { id } => {
            let record = load(ctx, &id).await?;
            let descriptor = ctx.loader.load_record(&record)?;

            println!("{} {}", descriptor.name, dim(&format!("({})", record.id)));
            if !descriptor.description.is_empty() {
                println!("{}", descriptor.description);
            }
            if !check_content(&record.source, Some(&record.content_hash)) {
                println!("{}", dim("stored hash does not match source"));
            }

            println!("\nConfig schema:");
            let options: Vec<Vec<String>> = descriptor
                .config_schema
                .iter()
                .map(|(key, item)| {
                    vec![
                        key.clone(),
                        item.kind.to_string(),
                        item.default_value.to_string(),
                        record.global_config.get(key).map(|v| v.to_string()).unwrap_or_default(),
                        item.description.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print!("{}", render_table(&["KEY", "TYPE", "DEFAULT", "GLOBAL", "DESCRIPTION"], &options, 40));

            println!("\nHooks:");
            let hooks: Vec<Vec<String>> = descriptor
                .hooks
                .signature()
                .into_iter()
                .map(|(stage, order, handler)| vec![stage.to_string(), order.to_string(), handler])
                .collect();
            print!("{}", render_table(&["STAGE", "ORDER", "HANDLER"], &hooks, 40));
        }
        PluginCommands::Config { id, sets } => {
            let mut record = load(ctx, &id).await?;
            let schema = ctx.loader.load_record(&record)?.config_schema;
            for raw in &sets {
                let (key, value) = overrides::split_assignment(raw)?;
                overrides::apply(&schema, &mut record.global_config, key, value)?;
            }
            ctx.store.put_plugin(&record).await?;
            println!("{}", serde_json::to_string_pretty(&record.global_config)?);
        }
        PluginCommands::Remove { id } => {
            if !ctx.store.delete_plugin(&id).await? {
                bail!("plugin '{id}' not found");
            }
            note_success(&format!("Removed plugin {id}"));
        }
    }
    Ok(())
}

async fn load(ctx: &AppContext, id: &str) -> Result<PluginRecord> {
    ctx.store
        .get_plugin(id)
        .await?
        .with_context(|| format!("plugin '{id}' not found"))
}
