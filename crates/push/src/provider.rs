//! Push backend contract.

use std::collections::BTreeSet;

use {async_trait::async_trait, futures::future::join_all, tracing::warn};

use crate::{NotificationJob, Platform, Result};

/// A push backend. Providers are registered with the router, one per
/// backend; the router owns timeouts, dedupe and fallback.
#[async_trait]
pub trait PushProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Platforms this provider can deliver to.
    fn supported_channels(&self) -> BTreeSet<Platform>;

    /// Check credentials and settings. A provider that fails this is not
    /// registered.
    fn validate_config(&self) -> Result<()>;

    async fn send(&self, job: &NotificationJob) -> Result<()>;

    /// Send a group of same-platform jobs, one result per job in input
    /// order. A failing job never aborts the rest.
    ///
    /// The default sends every job concurrently through [`send`](Self::send).
    /// Backends with a native multi-recipient call override this.
    async fn send_batch(&self, jobs: &[NotificationJob]) -> Vec<Result<()>> {
        let results = join_all(jobs.iter().map(|job| self.send(job))).await;
        for (job, result) in jobs.iter().zip(&results) {
            if let Err(error) = result {
                warn!(
                    provider = self.provider_name(),
                    message_id = %job.message_id,
                    recipient_id = %job.recipient_id,
                    %error,
                    "batch job failed"
                );
            }
        }
        results
    }
}
