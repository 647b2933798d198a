pub mod conversation;
pub mod entity;
pub mod error;
pub mod schema;
pub mod traits;
pub mod types;

pub use conversation::{Conversation, Message, Role};
pub use entity::{
    Chat, HolderKind, HolderRef, PluginAttachment, PluginAttachments, PluginRecord, Prefab,
    Provider, ProviderKind,
};
pub use error::{
    ChatError, ConfigTypeError, DecryptionError, HookExecutionError, LoadError,
};
pub use schema::{ConfigItem, ConfigKind, ConfigSchema, ConfigValue};
pub use traits::{ChatStore, SecretStore};
pub use types::{Capabilities, LifecycleEvent, Stage};
