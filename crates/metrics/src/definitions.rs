//! Metric name and label definitions.
//!
//! Every metric the delivery core records is named here so dashboards and
//! alerts have one place to look.

/// Admission controller metrics
pub mod admission {
    /// Total admission decisions, labelled by `allowed`
    pub const DECISIONS_TOTAL: &str = "courier_admission_decisions_total";
    /// Identities currently holding a rate window
    pub const TRACKED_IDENTITIES: &str = "courier_admission_tracked_identities";
    /// Expired windows removed by the sweep task
    pub const EVICTIONS_TOTAL: &str = "courier_admission_evictions_total";
}

/// Content gate metrics
pub mod gate {
    /// Messages rejected by moderation, labelled by `code`
    pub const CONTENT_REJECTED_TOTAL: &str = "courier_gate_content_rejected_total";
    /// Messages flagged as spam, labelled by `reason`
    pub const SPAM_DETECTED_TOTAL: &str = "courier_gate_spam_detected_total";
}

/// Dispatcher metrics
pub mod delivery {
    /// Messages entering the pipeline
    pub const MESSAGES_TOTAL: &str = "courier_delivery_messages_total";
    /// Per-recipient outcomes, labelled by `channel` and `outcome`
    pub const OUTCOMES_TOTAL: &str = "courier_delivery_outcomes_total";
    /// End-to-end dispatch duration in seconds
    pub const DISPATCH_DURATION_SECONDS: &str = "courier_delivery_dispatch_duration_seconds";
    /// Recipients partitioned as live on the last pass
    pub const LIVE_RECIPIENTS: &str = "courier_delivery_live_recipients";
}

/// Push provider metrics
pub mod push {
    /// Jobs handed to a provider, labelled by `provider` and `success`
    pub const SENDS_TOTAL: &str = "courier_push_sends_total";
    /// Provider call duration in seconds
    pub const SEND_DURATION_SECONDS: &str = "courier_push_send_duration_seconds";
    /// Duplicate jobs dropped by the ledger
    pub const DUPLICATES_TOTAL: &str = "courier_push_duplicates_total";
    /// Unknown-platform jobs that fell back to the alternate provider
    pub const FALLBACKS_TOTAL: &str = "courier_push_fallbacks_total";
    /// Providers that passed config validation and joined the routing table
    pub const PROVIDERS_REGISTERED: &str = "courier_push_providers_registered";
}

/// Presence metrics
pub mod presence {
    /// Live connections currently held
    pub const CONNECTIONS_ACTIVE: &str = "courier_presence_connections_active";
    /// Frames written to live connections
    pub const FRAMES_SENT_TOTAL: &str = "courier_presence_frames_sent_total";
}

/// Common label keys
pub mod labels {
    pub const ALLOWED: &str = "allowed";
    pub const CODE: &str = "code";
    pub const REASON: &str = "reason";
    pub const CHANNEL: &str = "channel";
    pub const OUTCOME: &str = "outcome";
    pub const PROVIDER: &str = "provider";
    pub const PLATFORM: &str = "platform";
    pub const SUCCESS: &str = "success";
}

/// Standard histogram buckets
pub mod buckets {
    use std::sync::LazyLock;

    /// In-process dispatch durations, 0.5ms to 10s
    pub static DISPATCH_DURATION: LazyLock<Vec<f64>> = LazyLock::new(|| {
        vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
        ]
    });

    /// Push provider round trips, 10ms to 30s
    pub static PUSH_DURATION: LazyLock<Vec<f64>> = LazyLock::new(|| {
        vec![
            0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]
    });
}
