//! `parley prefab ...`

use anyhow::Result;
use clap::Subcommand;
use parley_core::{ChatStore, HolderKind, HolderRef, Prefab};
use parley_store::import_prefab;
use uuid::Uuid;

use crate::context::AppContext;
use crate::output::{note_success, render_table};
use crate::provider_cmd::attach_existing;

#[derive(Subcommand)]
pub enum PrefabCommands {
    /// Save a named set of plugins
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Plugin ids to include
        #[arg(long = "plugin")]
        plugins: Vec<String>,
    },
    /// List prefabs
    List,
    /// Merge a prefab's plugins into a provider, prefab or chat
    Import {
        prefab_id: String,
        /// provider, prefab or chat
        #[arg(long)]
        into: HolderKind,
        /// Id of the receiving record
        #[arg(long)]
        id: String,
    },
}

pub async fn run(ctx: &AppContext, cmd: PrefabCommands) -> Result<()> {
    match cmd {
        PrefabCommands::Add { name, description, tags, plugins } => {
            let prefab = Prefab {
                id: Uuid::new_v4().to_string(),
                name,
                description,
                tags,
                plugins: attach_existing(ctx, &plugins).await?,
            };
            ctx.store.put_prefab(&prefab).await?;
            note_success(&format!("Added prefab '{}' as {}", prefab.name, prefab.id));
        }
        PrefabCommands::List => {
            let rows: Vec<Vec<String>> = ctx
                .store
                .list_prefabs()
                .await?
                .into_iter()
                .map(|p| {
                    vec![
                        p.id.clone(),
                        p.name.clone(),
                        p.plugins.ids().collect::<Vec<_>>().join(","),
                        p.description.clone(),
                    ]
                })
                .collect();
            print!("{}", render_table(&["ID", "NAME", "PLUGINS", "DESCRIPTION"], &rows, 40));
        }
        PrefabCommands::Import { prefab_id, into, id } => {
            let target = HolderRef::new(into, id);
            let merged = import_prefab(ctx.store.as_ref(), &prefab_id, &target).await?;
            note_success(&format!(
                "{} {} now has plugins: {}",
                target.kind,
                target.id,
                merged.ids().collect::<Vec<_>>().join(", ")
            ));
        }
    }
    Ok(())
}
