//! `parley chat ...`

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use parley_core::{Chat, ChatStore, Conversation, LifecycleEvent, Stage};
use parley_hooks::RegistryWarning;

use crate::context::AppContext;
use crate::output::{BOLD, RESET, dim, note_info, note_success, note_warn, render_table, supports_color};
use crate::overrides;

#[derive(Subcommand)]
pub enum ChatCommands {
    /// Create a chat and run its onInit hooks
    New {
        /// Chat name (defaults to the prefab's name)
        name: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        /// Start from a prefab's plugins
        #[arg(long)]
        prefab: Option<String>,
    },
    /// List chats, most recent first
    List,
    /// Print a chat's conversation as rendered (inbound hooks applied)
    Show {
        id: String,
        /// Print the stored conversation without running hooks
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show effective plugin configs, optionally setting chat overrides
    Config {
        id: String,
        /// PLUGIN.KEY=VALUE; attaches the plugin to the chat if needed
        #[arg(long = "set", value_name = "PLUGIN.KEY=VALUE")]
        sets: Vec<String>,
    },
    /// Dry-run one hook stage against a chat and print the result
    RunStage {
        id: String,
        /// outbound, inbound, onInit, beforeSend or afterReceive
        stage: String,
    },
}

pub async fn run(ctx: &AppContext, cmd: ChatCommands) -> Result<()> {
    match cmd {
        ChatCommands::New { name, provider, prefab } => {
            let mut chat = match prefab {
                Some(prefab_id) => {
                    let prefab = ctx
                        .store
                        .get_prefab(&prefab_id)
                        .await?
                        .with_context(|| format!("prefab '{prefab_id}' not found"))?;
                    Chat::from_prefab(&prefab)
                }
                None => Chat::new("New chat"),
            };
            if let Some(name) = name {
                chat.name = name;
            }
            if let Some(provider_id) = provider {
                if ctx.store.get_provider(&provider_id).await?.is_none() {
                    bail!("provider '{provider_id}' not found");
                }
                chat.provider_id = Some(provider_id);
            }
            ctx.store.put_chat(&chat).await?;

            let opened = ctx.orchestrator().open_chat(&chat.id).await?;
            report_warnings(&opened.warnings);
            note_success(&format!(
                "Created chat '{}' as {} ({} messages)",
                chat.name,
                chat.id,
                opened.conversation.messages.len()
            ));
        }
        ChatCommands::List => {
            let rows: Vec<Vec<String>> = ctx
                .store
                .list_chats()
                .await?
                .into_iter()
                .map(|c| {
                    vec![
                        c.id.clone(),
                        c.name.clone(),
                        c.provider_id.clone().unwrap_or_else(|| "-".into()),
                        c.conversation.messages.len().to_string(),
                        c.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    ]
                })
                .collect();
            print!("{}", render_table(&["ID", "NAME", "PROVIDER", "MESSAGES", "UPDATED"], &rows, 40));
        }
        ChatCommands::Show { id, raw, json } => {
            let conversation = if raw {
                ctx.store
                    .get_chat(&id)
                    .await?
                    .with_context(|| format!("chat '{id}' not found"))?
                    .conversation
            } else {
                let view = ctx.orchestrator().display_conversation(&id).await?;
                report_warnings(&view.warnings);
                view.conversation
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&conversation)?);
            } else {
                print_conversation(&conversation);
            }
        }
        ChatCommands::Config { id, sets } => {
            if !sets.is_empty() {
                set_chat_overrides(ctx, &id, &sets).await?;
            }
            let report = ctx.orchestrator().effective_configs(&id).await?;
            report_warnings(&report.warnings);
            if report.configs.is_empty() {
                note_info("No plugins attached");
            }
            for view in report.configs {
                println!("{} {}", view.plugin_name, dim(&format!("({})", view.plugin_id)));
                println!("{}", serde_json::to_string_pretty(&view.config)?);
            }
        }
        ChatCommands::RunStage { id, stage } => {
            let stage = parse_stage(&stage)?;
            let outcome = ctx.orchestrator().preview_stage(&id, stage).await?;
            report_warnings(&outcome.warnings);
            println!("{}", serde_json::to_string_pretty(&outcome.conversation)?);
        }
    }
    Ok(())
}

async fn set_chat_overrides(ctx: &AppContext, chat_id: &str, sets: &[String]) -> Result<()> {
    let mut chat = ctx
        .store
        .get_chat(chat_id)
        .await?
        .with_context(|| format!("chat '{chat_id}' not found"))?;

    for raw in sets {
        let (path, value) = overrides::split_assignment(raw)?;
        let Some((plugin_id, key)) = path.split_once('.') else {
            bail!("expected PLUGIN.KEY=VALUE, got '{raw}'");
        };
        let record = ctx
            .store
            .get_plugin(plugin_id)
            .await?
            .with_context(|| format!("plugin '{plugin_id}' not found"))?;
        let schema = ctx.loader.load_record(&record)?.config_schema;

        let mut chat_overrides = chat.plugins.get(plugin_id).cloned().unwrap_or_default();
        overrides::apply(&schema, &mut chat_overrides, key, value)?;
        chat.plugins.insert(plugin_id, chat_overrides);
    }
    chat.touch();
    ctx.store.put_chat(&chat).await?;
    Ok(())
}

fn parse_stage(raw: &str) -> Result<Stage> {
    match raw {
        "outbound" => Ok(Stage::Outbound),
        "inbound" => Ok(Stage::Inbound),
        other => other
            .parse::<LifecycleEvent>()
            .map(Stage::Lifecycle)
            .map_err(|_| anyhow::anyhow!("unknown stage '{other}' (expected outbound, inbound, onInit, beforeSend or afterReceive)")),
    }
}

fn print_conversation(conversation: &Conversation) {
    if conversation.messages.is_empty() {
        note_info("No messages yet");
        return;
    }
    for message in &conversation.messages {
        let role = format!("{:?}", message.role).to_lowercase();
        let stamp = dim(&message.created_at.format("%H:%M").to_string());
        if supports_color() {
            println!("{BOLD}{role}{RESET} {stamp}");
        } else {
            println!("{role} {stamp}");
        }
        println!("{}\n", message.content);
    }
}

fn report_warnings(warnings: &[RegistryWarning]) {
    for warning in warnings {
        note_warn(&warning.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stage_names() {
        assert_eq!(parse_stage("outbound").unwrap(), Stage::Outbound);
        assert_eq!(
            parse_stage("afterReceive").unwrap(),
            Stage::Lifecycle(LifecycleEvent::AfterReceive)
        );
        assert!(parse_stage("after-send").is_err());
    }
}
