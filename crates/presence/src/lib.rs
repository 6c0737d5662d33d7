//! Liveness oracle consumed by the delivery pipeline.
//!
//! The transport layer owns connection state; the pipeline only asks who is
//! online and hands it a payload for those identities. Answers are never
//! cached across dispatch passes.

pub mod error;
pub mod table;

use std::collections::BTreeSet;

use {async_trait::async_trait, courier_common::Identity};

pub use {
    error::{Error, Result},
    table::{ConnectionTable, EventFrame},
};

/// Result of broadcasting to a set of identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Identities for which at least one connection accepted the frame.
    pub delivered: usize,
    /// Identities with no connection that accepted the frame.
    pub unreachable: BTreeSet<Identity>,
}

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    async fn is_connected(&self, identity: &Identity) -> bool;

    /// Push one event to every live connection of each identity.
    ///
    /// An `Err` means nothing was attempted; per-identity misses are reported
    /// through [`BroadcastReport::unreachable`].
    async fn broadcast_to_identities(
        &self,
        identities: &[Identity],
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<BroadcastReport>;
}
