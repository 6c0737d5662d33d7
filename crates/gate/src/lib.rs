//! Content gate: moderation and spam evaluation.
//!
//! The two checks are exposed as one capability trait so a keyword filter,
//! an ML classifier, or a third-party API can be swapped in without touching
//! the delivery pipeline. The pipeline composes the checks itself; an
//! implementation never chains them internally.

pub mod error;
pub mod keyword;
pub mod spam;

use {
    async_trait::async_trait,
    courier_common::{Identity, MessageKind},
    serde::Serialize,
};

pub use {
    error::{Error, Result},
    keyword::{KeywordGate, KeywordModerator},
    spam::{SpamDetector, SpamReason},
};

/// Placeholder forwarded instead of rejected text content.
pub const REMOVED_MESSAGE: &str = "[message removed]";
/// Placeholder forwarded instead of a rejected attachment caption.
pub const REMOVED_ATTACHMENT: &str = "[attachment removed]";

/// Redacted stand-in for rejected content of the given kind.
pub fn placeholder_for(kind: MessageKind) -> &'static str {
    if kind.is_textual() {
        REMOVED_MESSAGE
    } else {
        REMOVED_ATTACHMENT
    }
}

/// Result of a moderation check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResult {
    pub approved: bool,
    /// Matched rule codes, sorted and deduplicated.
    pub violations: Vec<String>,
    pub confidence: f32,
    /// The original content when approved, a placeholder otherwise.
    pub filtered_content: String,
}

impl ModerationResult {
    pub fn approve(content: &str) -> Self {
        Self {
            approved: true,
            violations: Vec::new(),
            confidence: 0.0,
            filtered_content: content.to_string(),
        }
    }
}

/// Result of a spam check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamResult {
    pub is_spam: bool,
    pub confidence: f32,
    /// Heuristics that fired, sorted.
    pub reasons: Vec<SpamReason>,
}

impl SpamResult {
    pub fn clean() -> Self {
        Self {
            is_spam: false,
            confidence: 0.0,
            reasons: Vec::new(),
        }
    }
}

/// Moderation and spam capabilities consumed by the dispatcher.
#[async_trait]
pub trait ContentGate: Send + Sync {
    /// Implementation name used in logs (e.g. "keyword").
    fn name(&self) -> &str;

    async fn moderate_content(&self, content: &str, kind: MessageKind) -> ModerationResult;

    async fn detect_spam(&self, sender: &Identity, content: &str) -> SpamResult;
}

/// Gate that approves everything.
pub struct NoopContentGate;

#[async_trait]
impl ContentGate for NoopContentGate {
    fn name(&self) -> &str {
        "noop"
    }

    async fn moderate_content(&self, content: &str, _kind: MessageKind) -> ModerationResult {
        ModerationResult::approve(content)
    }

    async fn detect_spam(&self, _sender: &Identity, _content: &str) -> SpamResult {
        SpamResult::clean()
    }
}
