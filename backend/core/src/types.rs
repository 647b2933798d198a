use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named lifecycle points at which `anyHooks` run against the
/// source-of-truth conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEvent {
    /// A chat session is opened.
    OnInit,
    /// The user's message was appended, before outbound hooks run.
    BeforeSend,
    /// The assistant reply is complete and inbound hooks have run.
    AfterReceive,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] =
        [LifecycleEvent::OnInit, LifecycleEvent::BeforeSend, LifecycleEvent::AfterReceive];

    /// Event name as written in plugin sources.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::OnInit => "onInit",
            LifecycleEvent::BeforeSend => "beforeSend",
            LifecycleEvent::AfterReceive => "afterReceive",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown lifecycle event '{s}'"))
    }
}

/// A pipeline stage a hook list is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "stage", content = "event", rename_all = "camelCase")]
pub enum Stage {
    /// Before the provider call; shapes what the provider sees.
    Outbound,
    /// After the provider call; shapes the received reply.
    Inbound,
    Lifecycle(LifecycleEvent),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Outbound => f.write_str("outbound"),
            Stage::Inbound => f.write_str("inbound"),
            Stage::Lifecycle(event) => write!(f, "lifecycle:{event}"),
        }
    }
}

/// Capability object handed to every hook. Reserved; currently empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip() {
        for event in LifecycleEvent::ALL {
            assert_eq!(event.as_str().parse::<LifecycleEvent>().unwrap(), event);
        }
        assert!("after-send".parse::<LifecycleEvent>().is_err());
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Outbound.to_string(), "outbound");
        assert_eq!(
            Stage::Lifecycle(LifecycleEvent::BeforeSend).to_string(),
            "lifecycle:beforeSend"
        );
    }
}
