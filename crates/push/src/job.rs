//! Notification jobs and their payloads.

use std::fmt;

use {
    courier_common::Identity,
    serde::{Deserialize, Serialize},
};

/// Device platform a job is routed by.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Web,
    #[default]
    Unknown,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification shows. Platform-specific fields are only set for the
/// platform that uses them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub message_id: String,
    pub dialog_id: String,
    /// iOS notification grouping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Android collapse key; newer notifications replace older ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    /// Web: page to open when clicked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Idempotency key of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub message_id: String,
    pub recipient_id: Identity,
}

/// One push notification for one offline recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub message_id: String,
    pub recipient_id: Identity,
    pub platform: Platform,
    pub payload: PushPayload,
    pub attempts: u32,
    /// Device token, FCM registration token, or serialized Web Push
    /// subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl NotificationJob {
    pub fn new(
        message_id: impl Into<String>,
        recipient_id: Identity,
        platform: Platform,
        payload: PushPayload,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            recipient_id,
            platform,
            payload,
            attempts: 0,
            address: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            message_id: self.message_id.clone(),
            recipient_id: self.recipient_id.clone(),
        }
    }

    /// Address or [`ProviderError::MissingAddress`](crate::ProviderError::MissingAddress).
    pub fn require_address(&self) -> crate::Result<&str> {
        self.address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or(crate::ProviderError::MissingAddress)
    }
}
