//! Message entities handed to the delivery core by the ingestion layer.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque user/account id. Keys rate-limit state and identifies recipients.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Content type of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }

    /// Whether the content field is the payload itself rather than a caption
    /// or reference to an attachment.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::System)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-formed, already-persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub dialog_id: String,
    pub sender_id: Identity,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub recipient_ids: Vec<Identity>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        dialog_id: impl Into<String>,
        sender_id: impl Into<Identity>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            dialog_id: dialog_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            recipient_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_recipients<I, T>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Identity>,
    {
        self.recipient_ids = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Recipients deduplicated, with the sender removed.
    pub fn normalized_recipients(&self) -> BTreeSet<Identity> {
        self.recipient_ids
            .iter()
            .filter(|id| **id != self.sender_id)
            .cloned()
            .collect()
    }

    /// Check the fields the ingestion layer must fill in.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("id", self.id.as_str()),
            ("dialogId", self.dialog_id.as_str()),
            ("senderId", self.sender_id.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_message(format!("{field} is empty")));
            }
        }
        if self.normalized_recipients().is_empty() {
            return Err(Error::invalid_message("no recipients besides the sender"));
        }
        Ok(())
    }
}
