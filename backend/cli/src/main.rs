mod chat_cmd;
mod context;
mod output;
mod overrides;
mod plugin_cmd;
mod prefab_cmd;
mod provider_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_logging::redact_sensitive_data;

use chat_cmd::ChatCommands;
use context::AppContext;
use plugin_cmd::PluginCommands;
use prefab_cmd::PrefabCommands;
use provider_cmd::ProviderCommands;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Manage chat plugins, providers, prefabs and conversations")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to config.yaml in PARLEY_CONFIG_DIR or ~/.parley)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store, inspect and configure plugins
    #[command(subcommand)]
    Plugin(PluginCommands),
    /// Register AI providers
    #[command(subcommand)]
    Provider(ProviderCommands),
    /// Reusable plugin sets
    #[command(subcommand)]
    Prefab(PrefabCommands),
    /// Create chats and run their hooks
    #[command(subcommand)]
    Chat(ChatCommands),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::note_error(&redact_sensitive_data(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::open(cli.config).await?;
    match cli.command {
        Commands::Plugin(cmd) => plugin_cmd::run(&ctx, cmd).await,
        Commands::Provider(cmd) => provider_cmd::run(&ctx, cmd).await,
        Commands::Prefab(cmd) => prefab_cmd::run(&ctx, cmd).await,
        Commands::Chat(cmd) => chat_cmd::run(&ctx, cmd).await,
    }
}
