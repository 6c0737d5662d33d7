//! Observable pipeline decisions.

use {
    courier_common::Identity,
    courier_gate::SpamReason,
    serde::Serialize,
    tokio::sync::mpsc,
};

use crate::outcome::{Channel, DeliveryOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    #[serde(rename_all = "camelCase")]
    GateDecision {
        message_id: String,
        approved: bool,
        violations: Vec<String>,
        reasons: Vec<SpamReason>,
    },
    #[serde(rename_all = "camelCase")]
    AdmissionDecision {
        message_id: String,
        identity: Identity,
        allowed: bool,
        retry_after_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Delivered {
        message_id: String,
        recipient_id: Identity,
        channel: Channel,
        outcome: DeliveryOutcome,
    },
}

/// Receives pipeline decisions. Implementations must not block.
pub trait DeliveryEventSink: Send + Sync {
    fn emit(&self, event: DeliveryEvent);
}

impl DeliveryEventSink for mpsc::UnboundedSender<DeliveryEvent> {
    fn emit(&self, event: DeliveryEvent) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.send(event);
    }
}
