//! In-memory connection table.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    courier_common::Identity,
    serde::Serialize,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, gauge, presence as presence_metrics};

use crate::{BroadcastReport, PresenceRegistry, Result};

/// Frame written to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFrame<'a> {
    pub r#type: &'static str,
    pub event: &'a str,
    pub payload: &'a serde_json::Value,
    pub seq: u64,
}

type Connections = HashMap<String, mpsc::UnboundedSender<String>>;

/// Identity → live connections. An identity may be connected from several
/// devices at once.
#[derive(Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<Identity, Connections>>,
    seq: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection whose write loop drains `sender`. Returns the
    /// connection id used for [`disconnect`](Self::disconnect).
    pub async fn register(
        &self,
        identity: &Identity,
        sender: mpsc::UnboundedSender<String>,
    ) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        inner
            .entry(identity.clone())
            .or_default()
            .insert(conn_id.clone(), sender);
        info!(%identity, conn_id, "connection registered");
        #[cfg(feature = "metrics")]
        gauge!(presence_metrics::CONNECTIONS_ACTIVE).increment(1.0);
        conn_id
    }

    /// Convenience for callers that want the receiving end created for them.
    pub async fn connect(&self, identity: &Identity) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = self.register(identity, tx).await;
        (conn_id, rx)
    }

    /// Remove one connection. Returns `false` if it was not registered.
    pub async fn disconnect(&self, identity: &Identity, conn_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(connections) = inner.get_mut(identity) else {
            return false;
        };
        let removed = connections.remove(conn_id).is_some();
        if connections.is_empty() {
            inner.remove(identity);
        }
        if removed {
            info!(%identity, conn_id, "connection removed");
            #[cfg(feature = "metrics")]
            gauge!(presence_metrics::CONNECTIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.values().map(HashMap::len).sum()
    }

    pub async fn identity_count(&self) -> usize {
        self.inner.read().await.len()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl PresenceRegistry for ConnectionTable {
    async fn is_connected(&self, identity: &Identity) -> bool {
        self.inner
            .read()
            .await
            .get(identity)
            .is_some_and(|conns| conns.values().any(|tx| !tx.is_closed()))
    }

    async fn broadcast_to_identities(
        &self,
        identities: &[Identity],
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<BroadcastReport> {
        let seq = self.next_seq();
        let json = serde_json::to_string(&EventFrame {
            r#type: "event",
            event,
            payload,
            seq,
        })?;

        let mut report = BroadcastReport::default();
        let mut pruned = 0usize;
        // Write lock: closed connections are dropped while we walk them.
        let mut inner = self.inner.write().await;
        for identity in identities {
            let accepted = match inner.get_mut(identity) {
                Some(connections) => {
                    let before = connections.len();
                    connections.retain(|_, tx| tx.send(json.clone()).is_ok());
                    pruned += before - connections.len();
                    let accepted = connections.len();
                    if connections.is_empty() {
                        inner.remove(identity);
                    }
                    accepted
                },
                None => 0,
            };
            if accepted > 0 {
                report.delivered += 1;
                #[cfg(feature = "metrics")]
                counter!(presence_metrics::FRAMES_SENT_TOTAL).increment(accepted as u64);
            } else {
                report.unreachable.insert(identity.clone());
            }
        }
        drop(inner);

        #[cfg(feature = "metrics")]
        {
            if pruned > 0 {
                gauge!(presence_metrics::CONNECTIONS_ACTIVE).decrement(pruned as f64);
            }
        }
        debug!(
            event,
            seq,
            delivered = report.delivered,
            unreachable = report.unreachable.len(),
            pruned,
            "broadcast event"
        );
        Ok(report)
    }
}
