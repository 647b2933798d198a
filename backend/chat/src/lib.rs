//! `parley-chat`: drives one user turn through the hook pipeline and the
//! provider call, persisting the conversation at every checkpoint.

pub mod cache;
pub mod orchestrator;
pub mod provider;
pub mod state;

pub use cache::ProviderCache;
pub use orchestrator::Orchestrator;
pub use provider::{ProviderClient, ProviderFactory, ProviderSettings, TextStream};
pub use state::{ConfigReport, PluginConfigView, SendOutcome, SendState, StageOutcome};
