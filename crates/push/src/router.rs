//! Routes notification jobs to registered providers.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use {
    courier_common::Identity,
    courier_config::PushConfig,
    futures::future::join_all,
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, gauge, histogram, labels, push as push_metrics};

use crate::{JobKey, JobLedger, NotificationJob, Platform, ProviderError, PushProvider, Result};

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// A provider accepted the notification.
    Sent,
    /// Already handed off for this `(messageId, recipientId)`.
    Duplicate,
    Failed {
        error: String,
        /// The backend reported the address as permanently invalid.
        gone: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub message_id: String,
    pub recipient_id: Identity,
    pub platform: Platform,
    /// Last provider tried, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobReport {
    pub fn is_sent(&self) -> bool {
        self.status == JobStatus::Sent
    }
}

/// Provider registry plus idempotent, timeout-bounded fan-out.
///
/// Jobs for a known platform go to the first registered provider supporting
/// it. `Unknown` jobs try the first registered provider and, on failure,
/// exactly one alternate.
pub struct NotificationRouter {
    providers: RwLock<Vec<Arc<dyn PushProvider>>>,
    ledger: JobLedger,
    send_timeout: Duration,
}

impl NotificationRouter {
    pub fn new(config: &PushConfig) -> Self {
        Self::with_settings(config.send_timeout(), config.job_ttl(), config.max_tracked_jobs)
    }

    pub fn with_settings(send_timeout: Duration, job_ttl: Duration, max_tracked_jobs: usize) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            ledger: JobLedger::new(job_ttl, max_tracked_jobs),
            send_timeout,
        }
    }

    /// Validate and register a provider. A provider failing validation is
    /// not registered and the error is returned.
    pub fn register(&self, provider: Arc<dyn PushProvider>) -> Result<()> {
        let name = provider.provider_name().to_string();
        if let Err(error) = provider.validate_config() {
            warn!(provider = %name, %error, "push provider failed validation, not registered");
            return Err(error);
        }
        let channels: Vec<&str> = provider
            .supported_channels()
            .into_iter()
            .map(Platform::as_str)
            .collect();
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        providers.push(provider);
        info!(provider = %name, channels = ?channels, "push provider registered");
        #[cfg(feature = "metrics")]
        gauge!(push_metrics::PROVIDERS_REGISTERED).set(providers.len() as f64);
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|p| p.provider_name().to_string())
            .collect()
    }

    pub fn tracked_jobs(&self) -> usize {
        self.ledger.len()
    }

    /// Providers to try for `platform`, in order.
    fn candidates(&self, platform: Platform) -> Vec<Arc<dyn PushProvider>> {
        let providers = self.snapshot();
        match platform {
            Platform::Unknown => providers.into_iter().take(2).collect(),
            known => providers
                .into_iter()
                .find(|p| p.supported_channels().contains(&known))
                .into_iter()
                .collect(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn PushProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hand off every job and report on each, in input order. Jobs already
    /// claimed are reported as duplicates without touching a provider; one
    /// job's failure never affects another. A failed job's claim is released
    /// so a later dispatch of the same message can try it again.
    pub async fn dispatch(&self, jobs: Vec<NotificationJob>) -> Vec<JobReport> {
        let mut reports: Vec<(usize, JobReport)> = Vec::with_capacity(jobs.len());
        let mut groups: BTreeMap<Platform, Vec<(usize, NotificationJob)>> = BTreeMap::new();

        for (index, job) in jobs.into_iter().enumerate() {
            if self.ledger.claim(&job.key()) {
                groups.entry(job.platform).or_default().push((index, job));
            } else {
                debug!(
                    message_id = %job.message_id,
                    recipient_id = %job.recipient_id,
                    "notification job already dispatched"
                );
                #[cfg(feature = "metrics")]
                counter!(push_metrics::DUPLICATES_TOTAL).increment(1);
                reports.push((index, JobReport {
                    message_id: job.message_id,
                    recipient_id: job.recipient_id,
                    platform: job.platform,
                    provider: None,
                    attempts: job.attempts,
                    status: JobStatus::Duplicate,
                }));
            }
        }

        let group_runs = groups.into_iter().map(|(platform, group)| async move {
            debug!(%platform, jobs = group.len(), "dispatching platform group");
            match platform {
                Platform::Unknown => {
                    join_all(
                        group
                            .into_iter()
                            .map(|(index, job)| async move { (index, self.deliver(job).await) }),
                    )
                    .await
                },
                known => self.deliver_group(known, group).await,
            }
        });
        let settled: Vec<(usize, JobReport)> =
            join_all(group_runs).await.into_iter().flatten().collect();

        for (_, report) in &settled {
            if matches!(report.status, JobStatus::Failed { .. }) {
                self.ledger.release(&JobKey {
                    message_id: report.message_id.clone(),
                    recipient_id: report.recipient_id.clone(),
                });
            }
        }
        reports.extend(settled);

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// One `send_batch` call for a same-platform group, on the first
    /// provider supporting the platform. No fallback.
    async fn deliver_group(
        &self,
        platform: Platform,
        group: Vec<(usize, NotificationJob)>,
    ) -> Vec<(usize, JobReport)> {
        let Some(provider) = self.candidates(platform).into_iter().next() else {
            warn!(%platform, jobs = group.len(), "no push provider for platform");
            return group
                .into_iter()
                .map(|(index, job)| {
                    let report =
                        failed_report(job, None, ProviderError::UnsupportedPlatform(platform));
                    (index, report)
                })
                .collect();
        };

        let (indices, mut jobs): (Vec<usize>, Vec<NotificationJob>) = group.into_iter().unzip();
        for job in &mut jobs {
            job.attempts += 1;
        }
        let name = provider.provider_name().to_string();
        let results = self.send_batch_with_timeout(provider.as_ref(), &jobs).await;

        indices
            .into_iter()
            .zip(jobs.into_iter().zip(results))
            .map(|(index, (job, result))| {
                let report = match result {
                    Ok(()) => {
                        debug!(
                            message_id = %job.message_id,
                            recipient_id = %job.recipient_id,
                            provider = %name,
                            "push notification sent"
                        );
                        sent_report(job, name.clone())
                    },
                    Err(error) => {
                        warn!(
                            message_id = %job.message_id,
                            recipient_id = %job.recipient_id,
                            provider = %name,
                            %error,
                            "push notification failed"
                        );
                        failed_report(job, Some(name.clone()), error)
                    },
                };
                (index, report)
            })
            .collect()
    }

    /// Primary then at most one alternate, one job at a time.
    async fn deliver(&self, mut job: NotificationJob) -> JobReport {
        let candidates = self.candidates(job.platform);
        let mut last_provider = None;
        let mut last_error = ProviderError::UnsupportedPlatform(job.platform);

        for (i, provider) in candidates.iter().enumerate() {
            if i > 0 {
                info!(
                    message_id = %job.message_id,
                    recipient_id = %job.recipient_id,
                    provider = provider.provider_name(),
                    "trying alternate push provider"
                );
                #[cfg(feature = "metrics")]
                counter!(push_metrics::FALLBACKS_TOTAL).increment(1);
            }
            job.attempts += 1;
            let name = provider.provider_name().to_string();
            match self.send_with_timeout(provider.as_ref(), &job).await {
                Ok(()) => {
                    debug!(
                        message_id = %job.message_id,
                        recipient_id = %job.recipient_id,
                        provider = %name,
                        "push notification sent"
                    );
                    return sent_report(job, name);
                },
                Err(error) => {
                    warn!(
                        message_id = %job.message_id,
                        recipient_id = %job.recipient_id,
                        provider = %name,
                        %error,
                        "push notification failed"
                    );
                    last_provider = Some(name);
                    last_error = error;
                },
            }
        }

        failed_report(job, last_provider, last_error)
    }

    async fn send_with_timeout(
        &self,
        provider: &dyn PushProvider,
        job: &NotificationJob,
    ) -> Result<()> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = match tokio::time::timeout(self.send_timeout, provider.send(job)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        #[cfg(feature = "metrics")]
        record_sends(provider, job.platform, std::slice::from_ref(&result), started);
        result
    }

    /// Always returns exactly one result per job. A timeout fails the whole
    /// group; results the provider left out count as a partial batch.
    async fn send_batch_with_timeout(
        &self,
        provider: &dyn PushProvider,
        jobs: &[NotificationJob],
    ) -> Vec<Result<()>> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let mut results = match tokio::time::timeout(self.send_timeout, provider.send_batch(jobs))
            .await
        {
            Ok(results) => results,
            Err(_) => jobs.iter().map(|_| Err(ProviderError::Timeout)).collect(),
        };
        let missing = jobs.len().saturating_sub(results.len());
        if missing > 0 {
            warn!(
                provider = provider.provider_name(),
                missing, "push provider returned too few batch results"
            );
        }
        results.truncate(jobs.len());
        results.extend((0..missing).map(|_| Err(ProviderError::PartialBatch { failed: missing })));

        #[cfg(feature = "metrics")]
        {
            if let Some(job) = jobs.first() {
                record_sends(provider, job.platform, &results, started);
            }
        }
        results
    }
}

fn sent_report(job: NotificationJob, provider: String) -> JobReport {
    JobReport {
        message_id: job.message_id,
        recipient_id: job.recipient_id,
        platform: job.platform,
        provider: Some(provider),
        attempts: job.attempts,
        status: JobStatus::Sent,
    }
}

fn failed_report(job: NotificationJob, provider: Option<String>, error: ProviderError) -> JobReport {
    JobReport {
        message_id: job.message_id,
        recipient_id: job.recipient_id,
        platform: job.platform,
        provider,
        attempts: job.attempts,
        status: JobStatus::Failed {
            gone: error.is_gone(),
            error: error.to_string(),
        },
    }
}

#[cfg(feature = "metrics")]
fn record_sends(
    provider: &dyn PushProvider,
    platform: Platform,
    results: &[Result<()>],
    started: std::time::Instant,
) {
    let provider_name = provider.provider_name().to_string();
    for result in results {
        let success = if result.is_ok() { "true" } else { "false" };
        counter!(
            push_metrics::SENDS_TOTAL,
            labels::PROVIDER => provider_name.clone(),
            labels::PLATFORM => platform.as_str(),
            labels::SUCCESS => success
        )
        .increment(1);
    }
    histogram!(
        push_metrics::SEND_DURATION_SECONDS,
        labels::PROVIDER => provider_name
    )
    .record(started.elapsed().as_secs_f64());
}
