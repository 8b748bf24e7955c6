//! Notification content as it travels from the CLI to the session process.
//!
//! Field names on the wire are camelCase with the acronym spellings the
//! session protocol has always used (`groupID`, `openURL`,
//! `activateBundleID`). Absent optionals are omitted rather than sent as
//! `null`.

use serde::{Deserialize, Serialize};

/// Title used by the CLI when `--title` is not given.
pub const DEFAULT_TITLE: &str = "Terminal";

/// Sound name reserved for "use the platform default sound".
pub const DEFAULT_SOUND: &str = "default";

/// How aggressively a notification may interrupt the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionLevel {
    /// Delivered quietly, no sound or banner.
    Passive,
    /// Normal banner delivery.
    #[default]
    Active,
    /// May break through focus modes.
    TimeSensitive,
}

impl InterruptionLevel {
    /// Wire spelling of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
            Self::TimeSensitive => "timeSensitive",
        }
    }
}

impl std::fmt::Display for InterruptionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterruptionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passive" => Ok(Self::Passive),
            "active" => Ok(Self::Active),
            "timeSensitive" => Ok(Self::TimeSensitive),
            other => Err(format!("invalid interruption level: {other}")),
        }
    }
}

/// The unit of content to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Optional second line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Body text. Must be non-empty after trimming.
    pub message: String,
    /// Group tag. At most one delivered notification per group stays live.
    #[serde(rename = "groupID", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Sound name, or [`DEFAULT_SOUND`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// URL opened on click (`http`, `https` or `file`).
    #[serde(rename = "openURL", default, skip_serializing_if = "Option::is_none")]
    pub open_url: Option<String>,
    /// Shell command run on click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,
    /// Bundle identifier activated on click.
    #[serde(rename = "activateBundleID", default, skip_serializing_if = "Option::is_none")]
    pub activate_bundle_id: Option<String>,
    /// Image attachment: remote URL, `file://` URL or bare local path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_image: Option<String>,
    /// Sender profile selecting the session identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_profile: Option<String>,
    /// Interruption level, `active` when absent.
    #[serde(default)]
    pub interruption_level: InterruptionLevel,
    /// Seconds to wait for a click result. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<i64>,
}

impl NotificationPayload {
    /// Payload with the default title and only a message set.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            subtitle: None,
            message: message.into(),
            group_id: None,
            sound: None,
            open_url: None,
            execute: None,
            activate_bundle_id: None,
            content_image: None,
            sender_profile: None,
            interruption_level: InterruptionLevel::default(),
            wait_seconds: None,
        }
    }

    /// Builder-style group tag.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_id = Some(group.into());
        self
    }

    /// Builder-style title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Group tag if present and non-empty.
    pub fn group(&self) -> Option<&str> {
        self.group_id.as_deref().filter(|g| !g.is_empty())
    }
}
