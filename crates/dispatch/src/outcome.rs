//! Structured pipeline results.

use std::time::Duration;

use {
    courier_common::Identity,
    courier_gate::SpamReason,
    serde::{Serialize, Serializer},
};

/// Pipeline stage of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Gated,
    Rejected,
    Admitted,
    Partitioned,
    Dispatching,
    Settled,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Gated => "gated",
            Self::Rejected => "rejected",
            Self::Admitted => "admitted",
            Self::Partitioned => "partitioned",
            Self::Dispatching => "dispatching",
            Self::Settled => "settled",
        }
    }
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Why a message was refused. Each is a policy outcome surfaced to the
/// sender, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[serde(rename_all = "camelCase")]
    ContentRejected {
        violations: Vec<String>,
        filtered_content: String,
        confidence: f32,
    },
    SpamDetected {
        reasons: Vec<SpamReason>,
        confidence: f32,
    },
    RateLimited {
        #[serde(rename = "retryAfterMs", serialize_with = "serialize_millis")]
        retry_after: Duration,
    },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContentRejected { .. } => "content_rejected",
            Self::SpamDetected { .. } => "spam_detected",
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Delivery channel used for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Live,
    Push,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Push => "push",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    LiveDelivered,
    /// Handed to a push provider (or already handed off earlier).
    Queued,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveDelivered => "live_delivered",
            Self::Queued => "queued",
            Self::Failed => "failed",
        }
    }
}

/// Settled outcome for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientDelivery {
    pub recipient_id: Identity,
    pub channel: Channel,
    pub outcome: DeliveryOutcome,
    /// Push provider that handled the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Failure reason, or a note such as a duplicate hand-off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub message_id: String,
    pub live: Vec<Identity>,
    pub offline: Vec<Identity>,
    /// One entry per normalized recipient, sorted by recipient.
    pub deliveries: Vec<RecipientDelivery>,
}

impl DispatchReport {
    pub fn delivery_for(&self, recipient: &Identity) -> Option<&RecipientDelivery> {
        self.deliveries.iter().find(|d| &d.recipient_id == recipient)
    }

    pub fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.deliveries.iter().filter(|d| d.outcome == outcome).count()
    }
}

/// What the sender learns about a send attempt. Delivery failures after
/// acceptance stay in the report and never turn into a rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum SendOutcome {
    Accepted(DispatchReport),
    Rejected(Rejection),
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            Self::Accepted(report) => Some(report),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}
