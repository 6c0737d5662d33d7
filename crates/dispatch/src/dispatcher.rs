//! The per-message delivery pipeline.
//!
//! `Received → Gated → {Rejected | Admitted} → Partitioned → Dispatching → Settled`

use std::{collections::BTreeSet, sync::Arc, time::Instant};

use {
    courier_admission::{AdmissionController, AdmissionDecision},
    courier_common::{Identity, Message},
    courier_config::CourierConfig,
    courier_gate::ContentGate,
    courier_presence::{BroadcastReport, PresenceRegistry},
    courier_push::{
        DeviceDirectory, DeviceRecord, JobReport, JobStatus, NotificationJob, NotificationRouter,
    },
    futures::future::join_all,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, delivery, gate as gate_metrics, gauge, histogram, labels};

use crate::{
    events::{DeliveryEvent, DeliveryEventSink},
    outcome::{
        Channel, DeliveryOutcome, DispatchReport, RecipientDelivery, Rejection, SendOutcome, Stage,
    },
    payload::{MESSAGE_EVENT, PayloadOptions, live_payload, push_payload},
};

/// Recipients split by liveness. Disjoint, and together exactly the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub live: Vec<Identity>,
    pub offline: Vec<Identity>,
}

/// Ask presence about every recipient. Input order is kept within each side.
pub async fn partition(presence: &dyn PresenceRegistry, recipients: &[Identity]) -> Partition {
    let connected = join_all(recipients.iter().map(|r| presence.is_connected(r))).await;
    let mut split = Partition::default();
    for (recipient, is_live) in recipients.iter().zip(connected) {
        if is_live {
            split.live.push(recipient.clone());
        } else {
            split.offline.push(recipient.clone());
        }
    }
    split
}

/// Behavior switches read from config.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Gate-rejected messages still consume an admission token.
    pub charge_rejected: bool,
    /// Recipients whose live broadcast failed are retried through push.
    pub push_fallback_on_live_failure: bool,
    pub payload: PayloadOptions,
}

impl DispatchSettings {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            charge_rejected: config.admission.charge_rejected,
            push_fallback_on_live_failure: config.dispatch.push_fallback_on_live_failure,
            payload: PayloadOptions {
                preview_chars: config.dispatch.preview_chars,
                web_url_base: config.dispatch.web_url_base.clone(),
            },
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&CourierConfig::default())
    }
}

/// Orchestrates gate, admission, presence and push for each message.
pub struct Dispatcher {
    gate: Arc<dyn ContentGate>,
    admission: Arc<AdmissionController>,
    presence: Arc<dyn PresenceRegistry>,
    devices: Arc<dyn DeviceDirectory>,
    router: Arc<NotificationRouter>,
    settings: DispatchSettings,
    events: Option<Arc<dyn DeliveryEventSink>>,
}

impl Dispatcher {
    pub fn new(
        gate: Arc<dyn ContentGate>,
        admission: Arc<AdmissionController>,
        presence: Arc<dyn PresenceRegistry>,
        devices: Arc<dyn DeviceDirectory>,
        router: Arc<NotificationRouter>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            gate,
            admission,
            presence,
            devices,
            router,
            settings,
            events: None,
        }
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn DeliveryEventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    fn emit(&self, event: DeliveryEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }

    /// Run one message through the pipeline. Never fails: refusals come back
    /// as [`SendOutcome::Rejected`] and delivery problems are recorded per
    /// recipient in the report.
    pub async fn dispatch(&self, message: &Message) -> SendOutcome {
        let started = Instant::now();
        debug!(message_id = %message.id, stage = Stage::Received.as_str(), "pipeline stage");
        #[cfg(feature = "metrics")]
        counter!(delivery::MESSAGES_TOTAL).increment(1);

        if let Some(rejection) = self.run_gate(message).await {
            return self.reject(message, rejection);
        }

        if let AdmissionDecision::Denied { retry_after } = self.admit(message, &message.sender_id)
        {
            return self.reject(message, Rejection::RateLimited { retry_after });
        }
        debug!(message_id = %message.id, stage = Stage::Admitted.as_str(), "pipeline stage");

        let recipients: Vec<Identity> = message.normalized_recipients().into_iter().collect();
        let split = partition(self.presence.as_ref(), &recipients).await;
        debug!(
            message_id = %message.id,
            stage = Stage::Partitioned.as_str(),
            live = split.live.len(),
            offline = split.offline.len(),
            "pipeline stage"
        );
        #[cfg(feature = "metrics")]
        gauge!(delivery::LIVE_RECIPIENTS).set(split.live.len() as f64);

        debug!(message_id = %message.id, stage = Stage::Dispatching.as_str(), "pipeline stage");
        let (live, pushed) = tokio::join!(
            self.deliver_live(message, &split.live),
            self.deliver_push(message, &split.offline),
        );
        let mut deliveries = live;
        deliveries.extend(pushed);

        if self.settings.push_fallback_on_live_failure {
            deliveries = self.fall_back_to_push(message, deliveries).await;
        }
        deliveries.sort_by(|a, b| a.recipient_id.cmp(&b.recipient_id));

        for settled in &deliveries {
            info!(
                message_id = %message.id,
                recipient_id = %settled.recipient_id,
                channel = settled.channel.as_str(),
                outcome = settled.outcome.as_str(),
                "delivery outcome"
            );
            #[cfg(feature = "metrics")]
            counter!(
                delivery::OUTCOMES_TOTAL,
                labels::CHANNEL => settled.channel.as_str(),
                labels::OUTCOME => settled.outcome.as_str()
            )
            .increment(1);
            self.emit(DeliveryEvent::Delivered {
                message_id: message.id.clone(),
                recipient_id: settled.recipient_id.clone(),
                channel: settled.channel,
                outcome: settled.outcome,
            });
        }

        debug!(
            message_id = %message.id,
            stage = Stage::Settled.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline stage"
        );
        #[cfg(feature = "metrics")]
        histogram!(delivery::DISPATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        SendOutcome::Accepted(DispatchReport {
            message_id: message.id.clone(),
            live: split.live,
            offline: split.offline,
            deliveries,
        })
    }

    /// Moderation first, then spam. The first refusal wins.
    async fn run_gate(&self, message: &Message) -> Option<Rejection> {
        let moderation = self
            .gate
            .moderate_content(&message.content, message.kind)
            .await;
        if !moderation.approved {
            info!(
                message_id = %message.id,
                approved = false,
                violations = ?moderation.violations,
                "content rejected"
            );
            #[cfg(feature = "metrics")]
            {
                for code in &moderation.violations {
                    counter!(gate_metrics::CONTENT_REJECTED_TOTAL, labels::CODE => code.clone())
                        .increment(1);
                }
            }
            self.emit(DeliveryEvent::GateDecision {
                message_id: message.id.clone(),
                approved: false,
                violations: moderation.violations.clone(),
                reasons: Vec::new(),
            });
            return Some(Rejection::ContentRejected {
                violations: moderation.violations,
                filtered_content: moderation.filtered_content,
                confidence: moderation.confidence,
            });
        }

        let spam = self
            .gate
            .detect_spam(&message.sender_id, &message.content)
            .await;
        if spam.is_spam {
            info!(
                message_id = %message.id,
                approved = false,
                reasons = ?spam.reasons,
                confidence = spam.confidence,
                "spam detected"
            );
            #[cfg(feature = "metrics")]
            {
                for reason in &spam.reasons {
                    counter!(gate_metrics::SPAM_DETECTED_TOTAL, labels::REASON => reason.as_str())
                        .increment(1);
                }
            }
            self.emit(DeliveryEvent::GateDecision {
                message_id: message.id.clone(),
                approved: false,
                violations: Vec::new(),
                reasons: spam.reasons.clone(),
            });
            return Some(Rejection::SpamDetected {
                reasons: spam.reasons,
                confidence: spam.confidence,
            });
        }

        debug!(
            message_id = %message.id,
            stage = Stage::Gated.as_str(),
            gate = self.gate.name(),
            approved = true,
            violations = ?moderation.violations,
            "pipeline stage"
        );
        self.emit(DeliveryEvent::GateDecision {
            message_id: message.id.clone(),
            approved: true,
            violations: moderation.violations,
            reasons: spam.reasons,
        });
        None
    }

    fn admit(&self, message: &Message, sender: &Identity) -> AdmissionDecision {
        let decision = self.admission.allow(sender);
        self.emit(DeliveryEvent::AdmissionDecision {
            message_id: message.id.clone(),
            identity: sender.clone(),
            allowed: decision.is_allowed(),
            retry_after_ms: decision.retry_after().as_millis() as u64,
        });
        decision
    }

    fn reject(&self, message: &Message, rejection: Rejection) -> SendOutcome {
        // Gate refusals consume a token too when configured.
        if self.settings.charge_rejected && !matches!(rejection, Rejection::RateLimited { .. }) {
            self.admit(message, &message.sender_id);
        }
        debug!(
            message_id = %message.id,
            stage = Stage::Rejected.as_str(),
            code = rejection.code(),
            "pipeline stage"
        );
        SendOutcome::Rejected(rejection)
    }

    async fn deliver_live(&self, message: &Message, live: &[Identity]) -> Vec<RecipientDelivery> {
        if live.is_empty() {
            return Vec::new();
        }
        let payload = live_payload(message);
        match self
            .presence
            .broadcast_to_identities(live, MESSAGE_EVENT, &payload)
            .await
        {
            Ok(BroadcastReport { unreachable, .. }) => live
                .iter()
                .map(|recipient| {
                    if unreachable.contains(recipient) {
                        warn!(
                            message_id = %message.id,
                            recipient_id = %recipient,
                            "live recipient unreachable during broadcast"
                        );
                        live_delivery(recipient, DeliveryOutcome::Failed, Some("unreachable"))
                    } else {
                        live_delivery(recipient, DeliveryOutcome::LiveDelivered, None)
                    }
                })
                .collect(),
            Err(error) => {
                warn!(message_id = %message.id, %error, "live broadcast failed");
                let detail = error.to_string();
                live.iter()
                    .map(|r| live_delivery(r, DeliveryOutcome::Failed, Some(detail.as_str())))
                    .collect()
            },
        }
    }

    async fn deliver_push(&self, message: &Message, offline: &[Identity]) -> Vec<RecipientDelivery> {
        if offline.is_empty() {
            return Vec::new();
        }
        let records = join_all(offline.iter().map(|r| self.devices.lookup(r))).await;
        let jobs = offline
            .iter()
            .zip(records)
            .map(|(recipient, record)| {
                let record = record.unwrap_or_else(DeviceRecord::unknown);
                let payload = push_payload(message, record.platform, &self.settings.payload);
                let mut job =
                    NotificationJob::new(&message.id, recipient.clone(), record.platform, payload);
                job.address = record.address;
                job
            })
            .collect();
        self.router
            .dispatch(jobs)
            .await
            .into_iter()
            .map(push_delivery)
            .collect()
    }

    async fn fall_back_to_push(
        &self,
        message: &Message,
        deliveries: Vec<RecipientDelivery>,
    ) -> Vec<RecipientDelivery> {
        let (failed_live, mut settled): (Vec<_>, Vec<_>) = deliveries
            .into_iter()
            .partition(|d| d.channel == Channel::Live && d.outcome == DeliveryOutcome::Failed);
        if failed_live.is_empty() {
            return settled;
        }
        let retry: BTreeSet<Identity> = failed_live.into_iter().map(|d| d.recipient_id).collect();
        info!(
            message_id = %message.id,
            recipients = retry.len(),
            "falling back to push for failed live recipients"
        );
        let retry: Vec<Identity> = retry.into_iter().collect();
        settled.extend(self.deliver_push(message, &retry).await);
        settled
    }
}

fn live_delivery(
    recipient: &Identity,
    outcome: DeliveryOutcome,
    detail: Option<&str>,
) -> RecipientDelivery {
    RecipientDelivery {
        recipient_id: recipient.clone(),
        channel: Channel::Live,
        outcome,
        provider: None,
        detail: detail.map(str::to_string),
    }
}

fn push_delivery(report: JobReport) -> RecipientDelivery {
    let (outcome, detail) = match report.status {
        JobStatus::Sent => (DeliveryOutcome::Queued, None),
        JobStatus::Duplicate => (DeliveryOutcome::Queued, Some("duplicate".to_string())),
        JobStatus::Failed { error, .. } => (DeliveryOutcome::Failed, Some(error)),
    };
    RecipientDelivery {
        recipient_id: report.recipient_id,
        channel: Channel::Push,
        outcome,
        provider: report.provider,
        detail,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeSet, HashSet},
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use {
        async_trait::async_trait,
        courier_config::{ModerationRule, SpamConfig},
        courier_gate::{KeywordGate, KeywordModerator, NoopContentGate, SpamDetector, SpamReason},
        courier_push::{InMemoryDeviceDirectory, Platform, PushProvider},
        tokio::sync::mpsc,
    };

    use super::*;

    fn id(s: &str) -> Identity {
        Identity::new(s)
    }

    /// Presence whose answers are fixed up front.
    #[derive(Default)]
    struct StubPresence {
        connected: HashSet<Identity>,
        /// Reported connected but dropped during broadcast.
        unreachable: HashSet<Identity>,
        broadcasts: Mutex<Vec<Vec<Identity>>>,
    }

    impl StubPresence {
        fn with_connected(ids: &[&str]) -> Self {
            Self {
                connected: ids.iter().map(|s| id(s)).collect(),
                ..Default::default()
            }
        }

        fn broadcasts(&self) -> Vec<Vec<Identity>> {
            self.broadcasts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PresenceRegistry for StubPresence {
        async fn is_connected(&self, identity: &Identity) -> bool {
            self.connected.contains(identity) || self.unreachable.contains(identity)
        }

        async fn broadcast_to_identities(
            &self,
            identities: &[Identity],
            _event: &str,
            _payload: &serde_json::Value,
        ) -> courier_presence::Result<BroadcastReport> {
            self.broadcasts.lock().unwrap().push(identities.to_vec());
            let unreachable: BTreeSet<Identity> = identities
                .iter()
                .filter(|i| self.unreachable.contains(*i))
                .cloned()
                .collect();
            Ok(BroadcastReport {
                delivered: identities.len() - unreachable.len(),
                unreachable,
            })
        }
    }

    struct Recorder {
        jobs: Mutex<Vec<NotificationJob>>,
    }

    #[async_trait]
    impl PushProvider for Recorder {
        fn provider_name(&self) -> &str {
            "recorder"
        }

        fn supported_channels(&self) -> BTreeSet<Platform> {
            BTreeSet::from([Platform::Ios, Platform::Android, Platform::Web])
        }

        fn validate_config(&self) -> courier_push::Result<()> {
            Ok(())
        }

        async fn send(&self, job: &NotificationJob) -> courier_push::Result<()> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    struct Fixture {
        presence: Arc<StubPresence>,
        recorder: Arc<Recorder>,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        fn new(gate: Arc<dyn ContentGate>, presence: StubPresence, settings: DispatchSettings) -> Self {
            Self::with_admission(
                gate,
                presence,
                settings,
                AdmissionController::with_limit(100, Duration::from_secs(60)),
            )
        }

        fn with_admission(
            gate: Arc<dyn ContentGate>,
            presence: StubPresence,
            settings: DispatchSettings,
            admission: AdmissionController,
        ) -> Self {
            let presence = Arc::new(presence);
            let recorder = Arc::new(Recorder {
                jobs: Mutex::new(Vec::new()),
            });
            let router = Arc::new(NotificationRouter::with_settings(
                Duration::from_secs(1),
                Duration::from_secs(60),
                1000,
            ));
            router.register(recorder.clone()).unwrap();
            let dispatcher = Dispatcher::new(
                gate,
                Arc::new(admission),
                presence.clone(),
                Arc::new(InMemoryDeviceDirectory::new()),
                router,
                settings,
            );
            Self {
                presence,
                recorder,
                dispatcher,
            }
        }

        fn pushed(&self) -> Vec<NotificationJob> {
            self.recorder.jobs.lock().unwrap().clone()
        }
    }

    fn keyword_gate(spam: SpamConfig) -> Arc<dyn ContentGate> {
        let rules = [ModerationRule {
            code: "abuse".into(),
            terms: vec!["idiot".into()],
            weight: 0.9,
        }];
        Arc::new(KeywordGate::new(
            KeywordModerator::new(&rules, 0.5).unwrap(),
            SpamDetector::new(spam),
        ))
    }

    fn message(content: &str, recipients: &[&str]) -> Message {
        Message::new("m1", "d1", "alice", content).with_recipients(recipients.iter().copied())
    }

    #[tokio::test]
    async fn partition_is_complete_and_disjoint() {
        let presence = StubPresence::with_connected(&["b", "d"]);
        let recipients = vec![id("a"), id("b"), id("c"), id("d")];
        let split = partition(&presence, &recipients).await;

        assert_eq!(split.live, vec![id("b"), id("d")]);
        assert_eq!(split.offline, vec![id("a"), id("c")]);
        let union: BTreeSet<_> = split.live.iter().chain(&split.offline).cloned().collect();
        assert_eq!(union.len(), recipients.len());
    }

    #[tokio::test]
    async fn splits_recipients_between_live_and_push() {
        let fx = Fixture::new(
            Arc::new(NoopContentGate),
            StubPresence::with_connected(&["bob"]),
            DispatchSettings::default(),
        );
        let outcome = fx
            .dispatcher
            .dispatch(&message("hi", &["carol", "bob", "alice", "bob"]))
            .await;

        let report = outcome.report().unwrap();
        assert_eq!(report.live, vec![id("bob")]);
        assert_eq!(report.offline, vec![id("carol")]);
        assert_eq!(report.deliveries.len(), 2);
        assert_eq!(report.deliveries[0].recipient_id, id("bob"));

        let bob = report.delivery_for(&id("bob")).unwrap();
        assert_eq!(bob.channel, Channel::Live);
        assert_eq!(bob.outcome, DeliveryOutcome::LiveDelivered);

        let carol = report.delivery_for(&id("carol")).unwrap();
        assert_eq!(carol.channel, Channel::Push);
        assert_eq!(carol.outcome, DeliveryOutcome::Queued);
        assert_eq!(carol.provider.as_deref(), Some("recorder"));

        assert_eq!(fx.presence.broadcasts(), vec![vec![id("bob")]]);
        let pushed = fx.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].recipient_id, id("carol"));
    }

    #[tokio::test]
    async fn content_rejection_skips_delivery() {
        let fx = Fixture::new(
            keyword_gate(SpamConfig::default()),
            StubPresence::with_connected(&["bob"]),
            DispatchSettings::default(),
        );
        let outcome = fx
            .dispatcher
            .dispatch(&message("you idiot", &["bob", "carol"]))
            .await;

        match outcome.rejection().unwrap() {
            Rejection::ContentRejected {
                violations,
                filtered_content,
                ..
            } => {
                assert_eq!(violations, &vec!["abuse".to_string()]);
                assert_eq!(filtered_content, "[message removed]");
            },
            other => panic!("unexpected rejection: {other:?}"),
        }
        assert!(fx.presence.broadcasts().is_empty());
        assert!(fx.pushed().is_empty());
    }

    #[tokio::test]
    async fn spam_rejection_reports_reasons() {
        let fx = Fixture::new(
            keyword_gate(SpamConfig {
                max_length: 10,
                ..Default::default()
            }),
            StubPresence::default(),
            DispatchSettings::default(),
        );
        let outcome = fx
            .dispatcher
            .dispatch(&message("this message is far too long", &["bob"]))
            .await;

        let Some(Rejection::SpamDetected { reasons, .. }) = outcome.rejection() else {
            panic!("expected spam rejection, got {outcome:?}");
        };
        assert!(reasons.contains(&SpamReason::TooLong));
        assert!(fx.pushed().is_empty());
    }

    #[tokio::test]
    async fn rate_limited_sender_is_rejected_with_retry_hint() {
        let fx = Fixture::with_admission(
            Arc::new(NoopContentGate),
            StubPresence::default(),
            DispatchSettings::default(),
            AdmissionController::with_limit(1, Duration::from_secs(30)),
        );
        assert!(fx.dispatcher.dispatch(&message("one", &["bob"])).await.is_accepted());

        let second = fx.dispatcher.dispatch(&message("two", &["bob"])).await;
        let Some(Rejection::RateLimited { retry_after }) = second.rejection() else {
            panic!("expected rate limit, got {second:?}");
        };
        assert!(*retry_after > Duration::ZERO);
        assert!(*retry_after <= Duration::from_secs(30));
        assert_eq!(fx.pushed().len(), 1);
    }

    #[tokio::test]
    async fn gate_rejection_charges_admission_when_configured() {
        let charged = Fixture::new(
            keyword_gate(SpamConfig::default()),
            StubPresence::default(),
            DispatchSettings::default(),
        );
        charged.dispatcher.dispatch(&message("idiot", &["bob"])).await;
        let window = charged.dispatcher.admission().window_of(&id("alice")).unwrap();
        assert_eq!(window.count, 1);

        let free = Fixture::new(
            keyword_gate(SpamConfig::default()),
            StubPresence::default(),
            DispatchSettings {
                charge_rejected: false,
                ..Default::default()
            },
        );
        free.dispatcher.dispatch(&message("idiot", &["bob"])).await;
        assert!(free.dispatcher.admission().window_of(&id("alice")).is_none());
    }

    #[tokio::test]
    async fn unreachable_live_recipient_fails_without_fallback() {
        let presence = StubPresence {
            unreachable: HashSet::from([id("bob")]),
            ..Default::default()
        };
        let fx = Fixture::new(Arc::new(NoopContentGate), presence, DispatchSettings::default());
        let outcome = fx.dispatcher.dispatch(&message("hi", &["bob"])).await;

        let bob = outcome.report().unwrap().delivery_for(&id("bob")).unwrap().clone();
        assert_eq!(bob.channel, Channel::Live);
        assert_eq!(bob.outcome, DeliveryOutcome::Failed);
        assert!(fx.pushed().is_empty());
    }

    #[tokio::test]
    async fn unreachable_live_recipient_falls_back_to_push() {
        let presence = StubPresence {
            unreachable: HashSet::from([id("bob")]),
            ..Default::default()
        };
        let fx = Fixture::new(
            Arc::new(NoopContentGate),
            presence,
            DispatchSettings {
                push_fallback_on_live_failure: true,
                ..Default::default()
            },
        );
        let outcome = fx.dispatcher.dispatch(&message("hi", &["bob"])).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.deliveries.len(), 1);
        assert_eq!(report.deliveries[0].channel, Channel::Push);
        assert_eq!(report.deliveries[0].outcome, DeliveryOutcome::Queued);
        assert_eq!(fx.pushed().len(), 1);
    }

    #[tokio::test]
    async fn offline_recipient_without_provider_is_failed() {
        let dispatcher = Dispatcher::new(
            Arc::new(NoopContentGate),
            Arc::new(AdmissionController::with_limit(10, Duration::from_secs(60))),
            Arc::new(StubPresence::default()),
            Arc::new(InMemoryDeviceDirectory::new()),
            Arc::new(NotificationRouter::with_settings(
                Duration::from_secs(1),
                Duration::from_secs(60),
                10,
            )),
            DispatchSettings::default(),
        );
        let outcome = dispatcher.dispatch(&message("hi", &["carol"])).await;

        assert!(outcome.is_accepted());
        let report = outcome.report().unwrap();
        assert_eq!(report.count(DeliveryOutcome::Failed), 1);
    }

    /// Fails every send until `recover` is called.
    struct Flaky {
        down: AtomicBool,
        sent: Mutex<Vec<NotificationJob>>,
    }

    #[async_trait]
    impl PushProvider for Flaky {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        fn supported_channels(&self) -> BTreeSet<Platform> {
            BTreeSet::from([Platform::Ios, Platform::Android, Platform::Web])
        }

        fn validate_config(&self) -> courier_push::Result<()> {
            Ok(())
        }

        async fn send(&self, job: &NotificationJob) -> courier_push::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(courier_push::ProviderError::Timeout);
            }
            self.sent.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_push_stays_failed_until_a_resend_succeeds() {
        let flaky = Arc::new(Flaky {
            down: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        });
        let router = Arc::new(NotificationRouter::with_settings(
            Duration::from_secs(1),
            Duration::from_secs(60),
            10,
        ));
        router.register(flaky.clone()).unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(NoopContentGate),
            Arc::new(AdmissionController::with_limit(10, Duration::from_secs(60))),
            Arc::new(StubPresence::default()),
            Arc::new(InMemoryDeviceDirectory::new()),
            router,
            DispatchSettings::default(),
        );
        let msg = message("hi", &["carol"]);

        for _ in 0..2 {
            let outcome = dispatcher.dispatch(&msg).await;
            let delivery = &outcome.report().unwrap().deliveries[0];
            assert_eq!(delivery.outcome, DeliveryOutcome::Failed);
            assert_ne!(delivery.detail.as_deref(), Some("duplicate"));
        }

        flaky.down.store(false, Ordering::SeqCst);
        let outcome = dispatcher.dispatch(&msg).await;
        let delivery = &outcome.report().unwrap().deliveries[0];
        assert_eq!(delivery.outcome, DeliveryOutcome::Queued);
        assert_eq!(delivery.detail, None);
        assert_eq!(flaky.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn emits_decisions_to_event_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fx = Fixture::new(
            Arc::new(NoopContentGate),
            StubPresence::with_connected(&["bob"]),
            DispatchSettings::default(),
        );
        let dispatcher = fx.dispatcher.with_event_sink(Arc::new(tx));
        dispatcher.dispatch(&message("hi", &["bob", "carol"])).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0],
            DeliveryEvent::GateDecision { approved: true, .. }
        ));
        assert!(matches!(
            events[1],
            DeliveryEvent::AdmissionDecision { allowed: true, .. }
        ));
        let delivered: Vec<_> = events[2..]
            .iter()
            .map(|e| match e {
                DeliveryEvent::Delivered {
                    recipient_id,
                    outcome,
                    ..
                } => (recipient_id.clone(), *outcome),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(delivered, vec![
            (id("bob"), DeliveryOutcome::LiveDelivered),
            (id("carol"), DeliveryOutcome::Queued),
        ]);
    }
}
