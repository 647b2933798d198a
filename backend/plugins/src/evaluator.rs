use parley_core::LoadError;

use crate::descriptor::PluginModule;

/// Turns plugin source into a [`PluginModule`].
///
/// Evaluation runs untrusted code; implementations must not share mutable
/// state between loads and must not cache compiled modules across calls.
pub trait Evaluator: Send + Sync {
    fn load(&self, source: &str) -> Result<PluginModule, LoadError>;
}
