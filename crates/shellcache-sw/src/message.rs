//! Messages posted from foreground pages to a controller.

use serde::{Deserialize, Serialize};

/// A control message. Wire shape: `{"action": "skipWaiting"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlMessage {
    /// Activate the waiting controller now.
    #[serde(rename = "skipWaiting")]
    SkipWaiting,
    /// Any other action; ignored.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Parse a raw message. Anything that is not an object with an
    /// `action` field becomes [`ControlMessage::Unknown`].
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or(Self::Unknown)
    }

    pub fn to_json(&self) -> String {
        match self {
            Self::SkipWaiting => r#"{"action":"skipWaiting"}"#.to_string(),
            Self::Unknown => "{}".to_string(),
        }
    }
}

/// What the controller did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkipWaitingRequested,
    Ignored,
}
