/// Config schema types (admission, content gate, dispatch, push providers, metrics).
use std::{collections::HashMap, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub admission: AdmissionConfig,
    pub gate: GateConfig,
    pub dispatch: DispatchConfig,
    pub push: PushConfig,
    pub metrics: MetricsConfig,
}

// ── Admission ───────────────────────────────────────────────────────────────

/// Per-identity send rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum sends allowed per identity within one window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// How often expired windows are swept from memory.
    pub sweep_interval_ms: u64,
    /// Whether a message rejected by the content gate still consumes a
    /// rate-limit token for its sender.
    pub charge_rejected: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            limit: 30,
            window_ms: 60_000,
            sweep_interval_ms: 30_000,
            charge_rejected: true,
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// ── Content gate ────────────────────────────────────────────────────────────

/// A moderation rule: any listed term matching marks the rule as violated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRule {
    /// Machine-readable violation code reported on match (e.g. "profanity").
    pub code: String,
    /// Terms matched case-insensitively on word boundaries.
    pub terms: Vec<String>,
    /// Confidence contributed by a match, 0.0–1.0.
    #[serde(default = "default_rule_weight")]
    pub weight: f32,
}

fn default_rule_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub rules: Vec<ModerationRule>,
    /// Minimum rule confidence that rejects a message.
    pub reject_threshold: f32,
    pub spam: SpamConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            reject_threshold: 0.5,
            spam: SpamConfig::default(),
        }
    }
}

/// Spam heuristic thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// Content longer than this many characters is always spam.
    pub max_length: usize,
    /// Confidence floor reported for over-length content.
    pub length_confidence: f32,
    /// Minimum heuristic confidence that flags content as spam.
    pub spam_threshold: f32,
    pub max_links: usize,
    pub link_confidence: f32,
    /// Share of tokens a single repeated token may take before the content
    /// counts as repetitive.
    pub repetition_ratio: f32,
    /// Repetition is only evaluated on content with at least this many tokens.
    pub repetition_min_tokens: usize,
    pub repetition_confidence: f32,
    /// Identical content from one sender allowed this many times per window.
    pub duplicate_limit: u32,
    pub duplicate_window_ms: u64,
    pub duplicate_confidence: f32,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            max_length: 4000,
            length_confidence: 0.95,
            spam_threshold: 0.8,
            max_links: 5,
            link_confidence: 0.85,
            repetition_ratio: 0.6,
            repetition_min_tokens: 8,
            repetition_confidence: 0.8,
            duplicate_limit: 5,
            duplicate_window_ms: 60_000,
            duplicate_confidence: 0.9,
        }
    }
}

impl SpamConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }
}

// ── Dispatch ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Enqueue a push notification for recipients the live transport
    /// reported as connected but failed to reach.
    pub push_fallback_on_live_failure: bool,
    /// Maximum characters of message text carried in a push preview.
    pub preview_chars: usize,
    /// Base URL for web push click-through links, e.g. "https://chat.example.com".
    pub web_url_base: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            push_fallback_on_live_failure: false,
            preview_chars: 120,
            web_url_base: None,
        }
    }
}

// ── Push ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Upper bound on a single provider call.
    pub send_timeout_ms: u64,
    /// How long a `(message, recipient)` job is remembered for deduplication.
    pub job_ttl_ms: u64,
    /// Maximum remembered jobs; the oldest are evicted first.
    pub max_tracked_jobs: usize,
    pub apns: Option<ApnsConfig>,
    pub fcm: Option<FcmConfig>,
    pub web_push: Option<WebPushConfig>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 10_000,
            job_ttl_ms: 24 * 60 * 60 * 1000,
            max_tracked_jobs: 100_000,
            apns: None,
            fcm: None,
            web_push: None,
        }
    }
}

impl PushConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_millis(self.job_ttl_ms)
    }
}

/// APNs environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApnsEnvironment {
    #[default]
    Production,
    Sandbox,
}

/// Apple Push Notification service (token-based auth).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApnsConfig {
    pub enabled: bool,
    pub environment: ApnsEnvironment,
    pub key_id: String,
    pub team_id: String,
    /// App bundle id sent as `apns-topic`.
    pub topic: String,
    /// PKCS#8 PEM of the `.p8` signing key.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key_pem: Option<Secret<String>>,
    /// Endpoint override (tests, proxies).
    pub endpoint: Option<String>,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            environment: ApnsEnvironment::default(),
            key_id: String::new(),
            team_id: String::new(),
            topic: String::new(),
            private_key_pem: None,
            endpoint: None,
        }
    }
}

/// Firebase Cloud Messaging (HTTP v1 API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmConfig {
    pub enabled: bool,
    pub project_id: String,
    /// OAuth2 bearer token for the FCM API, usually `${FCM_ACCESS_TOKEN}`.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,
    /// Endpoint override (tests, proxies).
    pub endpoint: Option<String>,
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: String::new(),
            access_token: None,
            endpoint: None,
        }
    }
}

/// Browser push via VAPID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebPushConfig {
    pub enabled: bool,
    /// PEM-encoded VAPID private key.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub vapid_private_key_pem: Option<Secret<String>>,
    /// Seconds the push service keeps an undelivered notification.
    pub ttl_secs: u32,
}

impl Default for WebPushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vapid_private_key_pem: None,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

// ── Metrics ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every exported metric.
    pub labels: HashMap<String, String>,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
