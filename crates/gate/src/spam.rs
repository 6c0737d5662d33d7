//! Local spam heuristics.

use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    courier_common::Identity,
    courier_config::SpamConfig,
    serde::Serialize,
};

use crate::SpamResult;

/// Prune stale duplicate-tracking entries every N checks.
const PRUNE_EVERY: u64 = 256;

/// Heuristic that flagged a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamReason {
    TooLong,
    TooManyLinks,
    Repetitive,
    DuplicateBurst,
}

impl SpamReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooLong => "too_long",
            Self::TooManyLinks => "too_many_links",
            Self::Repetitive => "repetitive",
            Self::DuplicateBurst => "duplicate_burst",
        }
    }
}

impl std::fmt::Display for SpamReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RecentContent {
    fingerprint: u64,
    count: u32,
    first_seen: Instant,
}

/// Scores messages on length, link density, token repetition and
/// per-sender duplicate bursts.
pub struct SpamDetector {
    config: SpamConfig,
    recent: Mutex<HashMap<Identity, RecentContent>>,
    checks: AtomicU64,
}

impl SpamDetector {
    pub fn new(config: SpamConfig) -> Self {
        Self {
            config,
            recent: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn detect(&self, sender: &Identity, content: &str) -> SpamResult {
        self.detect_at(sender, content, Instant::now())
    }

    pub fn detect_at(&self, sender: &Identity, content: &str, now: Instant) -> SpamResult {
        let cfg = &self.config;
        let mut hits: Vec<(SpamReason, f32)> = Vec::new();

        let too_long = content.chars().count() > cfg.max_length;
        if too_long {
            hits.push((SpamReason::TooLong, cfg.length_confidence));
        }
        if count_links(content) > cfg.max_links {
            hits.push((SpamReason::TooManyLinks, cfg.link_confidence));
        }
        if repetition_ratio(content, cfg.repetition_min_tokens)
            .is_some_and(|ratio| ratio > cfg.repetition_ratio)
        {
            hits.push((SpamReason::Repetitive, cfg.repetition_confidence));
        }
        if self.record_duplicate(sender, content, now) > cfg.duplicate_limit {
            hits.push((SpamReason::DuplicateBurst, cfg.duplicate_confidence));
        }

        let confidence = hits.iter().map(|(_, c)| *c).fold(0.0_f32, f32::max);
        let mut reasons: Vec<SpamReason> = hits.into_iter().map(|(r, _)| r).collect();
        reasons.sort();

        SpamResult {
            is_spam: too_long || (!reasons.is_empty() && confidence >= cfg.spam_threshold),
            confidence,
            reasons,
        }
    }

    /// Number of senders with tracked recent content.
    pub fn tracked_senders(&self) -> usize {
        self.lock().len()
    }

    /// Record `content` for `sender` and return how many times in a row it was
    /// seen inside the duplicate window.
    fn record_duplicate(&self, sender: &Identity, content: &str, now: Instant) -> u32 {
        let normalized = content.trim();
        if normalized.is_empty() {
            return 0;
        }
        let fingerprint = fingerprint(normalized);
        let window = self.config.duplicate_window();

        let mut recent = self.lock();
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            recent.retain(|_, r| now.saturating_duration_since(r.first_seen) <= window);
        }
        let entry = recent
            .entry(sender.clone())
            .or_insert_with(|| RecentContent {
                fingerprint,
                count: 0,
                first_seen: now,
            });
        if entry.fingerprint != fingerprint
            || now.saturating_duration_since(entry.first_seen) > window
        {
            *entry = RecentContent {
                fingerprint,
                count: 0,
                first_seen: now,
            };
        }
        entry.count += 1;
        entry.count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, RecentContent>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fingerprint(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.to_lowercase().hash(&mut hasher);
    hasher.finish()
}

fn count_links(content: &str) -> usize {
    content
        .split_whitespace()
        .filter(|token| {
            let lower = token.to_ascii_lowercase();
            lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
        })
        .count()
}

/// Share of the most frequent token, or `None` below `min_tokens`.
fn repetition_ratio(content: &str, min_tokens: usize) -> Option<f32> {
    let tokens: Vec<String> = content.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() || tokens.len() < min_tokens {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    Some(top as f32 / tokens.len() as f32)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    fn detector() -> SpamDetector {
        SpamDetector::new(SpamConfig {
            max_length: 50,
            max_links: 2,
            duplicate_limit: 3,
            duplicate_window_ms: 1_000,
            ..Default::default()
        })
    }

    fn sender() -> Identity {
        Identity::new("alice")
    }

    #[test]
    fn ordinary_message_is_clean() {
        let result = detector().detect(&sender(), "see you at lunch tomorrow");
        assert!(!result.is_spam);
        assert!(result.reasons.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn overlong_message_is_always_spam() {
        let d = SpamDetector::new(SpamConfig {
            max_length: 10,
            length_confidence: 0.1,
            spam_threshold: 0.9,
            ..Default::default()
        });
        let result = d.detect(&sender(), "this is far longer than ten characters");
        assert!(result.is_spam);
        assert_eq!(result.reasons, vec![SpamReason::TooLong]);
    }

    #[test]
    fn many_links_flagged() {
        let result = detector().detect(
            &sender(),
            "http://a.example https://b.example www.c.example",
        );
        assert!(result.is_spam);
        assert_eq!(result.reasons, vec![SpamReason::TooManyLinks]);
    }

    #[test]
    fn repetitive_tokens_flagged() {
        let result = detector().detect(&sender(), "buy buy buy buy buy buy buy now");
        assert!(result.reasons.contains(&SpamReason::Repetitive));
        assert!(result.is_spam);
    }

    #[test]
    fn short_messages_skip_repetition_check() {
        assert!(!detector().detect(&sender(), "ha ha ha").is_spam);
    }

    #[test]
    fn duplicate_burst_within_window() {
        let d = detector();
        let t0 = Instant::now();
        for i in 0..3 {
            let result = d.detect_at(&sender(), "same text", t0 + Duration::from_millis(i * 10));
            assert!(!result.is_spam, "send {i} should pass");
        }
        let result = d.detect_at(&sender(), "Same text ", t0 + Duration::from_millis(40));
        assert_eq!(result.reasons, vec![SpamReason::DuplicateBurst]);
        assert!(result.is_spam);

        // Other senders are tracked separately.
        assert!(!d.detect_at(&Identity::new("bob"), "same text", t0).is_spam);
    }

    #[test]
    fn duplicate_burst_resets_after_window_or_new_content() {
        let d = detector();
        let t0 = Instant::now();
        for _ in 0..3 {
            d.detect_at(&sender(), "same text", t0);
        }
        assert!(!d.detect_at(&sender(), "different", t0).is_spam);
        for _ in 0..3 {
            d.detect_at(&sender(), "same text", t0);
        }
        assert!(
            !d.detect_at(&sender(), "same text", t0 + Duration::from_secs(2))
                .is_spam
        );
    }

    #[test]
    fn reasons_display_as_codes() {
        assert_eq!(SpamReason::DuplicateBurst.to_string(), "duplicate_burst");
        assert_eq!(SpamReason::TooManyLinks.as_str(), "too_many_links");
    }
}
