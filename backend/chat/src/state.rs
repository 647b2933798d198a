use std::fmt;

use parley_core::{ConfigValue, Conversation};
use parley_hooks::RegistryWarning;

/// Where a chat is in the turn it is processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    /// The chat's slot is taken: a send is still checking its input and
    /// credentials, or a history edit is running.
    Busy,
    /// `onInit` hooks are running for a freshly opened chat.
    Opening,
    UserMessageAppended,
    LifecycleBeforeSend,
    OutboundHooksApplied,
    /// The only state a cancellation takes effect in.
    ProviderCallInFlight,
    InboundHooksApplied,
    LifecycleAfterReceive,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a completed send.
#[derive(Debug)]
pub struct SendOutcome {
    /// The persisted conversation after `afterReceive` hooks.
    pub conversation: Conversation,
    /// True when the provider call was cancelled and the reply carries the
    /// interruption marker.
    pub interrupted: bool,
    pub warnings: Vec<RegistryWarning>,
}

/// A conversation produced by a hook stage, with the plugins that could not
/// take part.
#[derive(Debug)]
pub struct StageOutcome {
    pub conversation: Conversation,
    pub warnings: Vec<RegistryWarning>,
}

/// Merged config of one attached plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfigView {
    pub plugin_id: String,
    pub plugin_name: String,
    pub config: ConfigValue,
}

/// Merged configs of every attached plugin, plus the plugins that could not
/// be loaded.
#[derive(Debug)]
pub struct ConfigReport {
    pub configs: Vec<PluginConfigView>,
    pub warnings: Vec<RegistryWarning>,
}
