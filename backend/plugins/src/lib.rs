//! `parley-plugins`: loading plugin source into hook descriptors.
//!
//! Plugin code is untrusted: it is evaluated by an [`Evaluator`] behind a
//! sandbox, and every hook it declares is exposed as a [`HookHandler`].

pub mod descriptor;
pub mod evaluator;
pub mod handler;
pub mod loader;
pub mod rhai_runtime;

pub use descriptor::{OrderedHook, PluginDescriptor, PluginHooks, PluginModule};
pub use evaluator::Evaluator;
pub use handler::{FnHook, HookHandler};
pub use loader::{PluginLoader, check_content, content_hash};
pub use rhai_runtime::{RhaiEvaluator, RhaiHandler};
