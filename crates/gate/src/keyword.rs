//! Keyword rule moderation and the default [`ContentGate`] built on it.

use {
    async_trait::async_trait,
    courier_common::{Identity, MessageKind},
    courier_config::{GateConfig, ModerationRule},
    regex::Regex,
    tracing::debug,
};

use crate::{
    ContentGate, ModerationResult, SpamResult,
    error::{Error, Result},
    placeholder_for,
    spam::SpamDetector,
};

struct CompiledRule {
    code: String,
    weight: f32,
    pattern: Regex,
}

/// Case-insensitive whole-word matcher over a set of weighted rules.
pub struct KeywordModerator {
    rules: Vec<CompiledRule>,
    reject_threshold: f32,
}

impl KeywordModerator {
    /// Compile `rules`. Rules whose terms are all blank never match and are
    /// dropped.
    pub fn new(rules: &[ModerationRule], reject_threshold: f32) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let terms: Vec<String> = rule
                .terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(regex::escape)
                .collect();
            if terms.is_empty() {
                continue;
            }
            // `\b` does not anchor terms that start or end with punctuation,
            // so boundaries are spelled out as "not a word character".
            let source = format!(
                r"(?i)(?:^|[^\p{{L}}\p{{N}}_])(?:{})(?:$|[^\p{{L}}\p{{N}}_])",
                terms.join("|")
            );
            let pattern = Regex::new(&source).map_err(|source| Error::InvalidRule {
                code: rule.code.clone(),
                source,
            })?;
            compiled.push(CompiledRule {
                code: rule.code.clone(),
                weight: rule.weight,
                pattern,
            });
        }
        Ok(Self {
            rules: compiled,
            reject_threshold,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn moderate(&self, content: &str, kind: MessageKind) -> ModerationResult {
        let mut violations = Vec::new();
        let mut confidence = 0.0_f32;
        for rule in self.rules.iter().filter(|r| r.pattern.is_match(content)) {
            violations.push(rule.code.clone());
            confidence = confidence.max(rule.weight);
        }
        violations.sort();
        violations.dedup();

        if violations.is_empty() || confidence < self.reject_threshold {
            return ModerationResult {
                approved: true,
                violations,
                confidence,
                filtered_content: content.to_string(),
            };
        }
        ModerationResult {
            approved: false,
            violations,
            confidence,
            filtered_content: placeholder_for(kind).to_string(),
        }
    }
}

/// Content gate backed by keyword rules and local spam heuristics.
pub struct KeywordGate {
    moderator: KeywordModerator,
    spam: SpamDetector,
}

impl KeywordGate {
    pub fn new(moderator: KeywordModerator, spam: SpamDetector) -> Self {
        Self { moderator, spam }
    }

    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let moderator = KeywordModerator::new(&config.rules, config.reject_threshold)?;
        debug!(
            rules = moderator.rule_count(),
            reject_threshold = config.reject_threshold,
            "keyword gate configured"
        );
        Ok(Self::new(moderator, SpamDetector::new(config.spam.clone())))
    }

    pub fn spam_detector(&self) -> &SpamDetector {
        &self.spam
    }
}

#[async_trait]
impl ContentGate for KeywordGate {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn moderate_content(&self, content: &str, kind: MessageKind) -> ModerationResult {
        self.moderator.moderate(content, kind)
    }

    async fn detect_spam(&self, sender: &Identity, content: &str) -> SpamResult {
        self.spam.detect(sender, content)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::REMOVED_ATTACHMENT, crate::REMOVED_MESSAGE};

    fn rule(code: &str, terms: &[&str], weight: f32) -> ModerationRule {
        ModerationRule {
            code: code.into(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            weight,
        }
    }

    fn moderator() -> KeywordModerator {
        KeywordModerator::new(
            &[
                rule("abuse", &["idiot", "moron"], 0.9),
                rule("mild", &["darn"], 0.3),
                rule("scam", &["free $$$"], 0.8),
            ],
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn clean_content_is_approved_unchanged() {
        let result = moderator().moderate("hello there", MessageKind::Text);
        assert!(result.approved);
        assert!(result.violations.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.filtered_content, "hello there");
    }

    #[test]
    fn matching_is_case_insensitive_and_whole_word() {
        let m = moderator();
        let hit = m.moderate("You IDIOT!", MessageKind::Text);
        assert!(!hit.approved);
        assert_eq!(hit.violations, vec!["abuse".to_string()]);
        assert_eq!(hit.filtered_content, REMOVED_MESSAGE);

        assert!(m.moderate("idiotic plan", MessageKind::Text).approved);
    }

    #[test]
    fn low_weight_match_is_reported_but_approved() {
        let result = moderator().moderate("darn it", MessageKind::Text);
        assert!(result.approved);
        assert_eq!(result.violations, vec!["mild".to_string()]);
        assert_eq!(result.filtered_content, "darn it");
    }

    #[test]
    fn confidence_is_max_weight_and_codes_are_sorted() {
        let result = moderator().moderate("darn moron", MessageKind::Image);
        assert_eq!(result.violations, vec!["abuse".to_string(), "mild".to_string()]);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.filtered_content, REMOVED_ATTACHMENT);
    }

    #[test]
    fn punctuated_terms_match() {
        let result = moderator().moderate("get free $$$ now", MessageKind::Text);
        assert_eq!(result.violations, vec!["scam".to_string()]);
    }

    #[test]
    fn blank_rules_are_dropped() {
        let m = KeywordModerator::new(&[rule("empty", &["  "], 1.0)], 0.5).unwrap();
        assert_eq!(m.rule_count(), 0);
    }

    #[tokio::test]
    async fn gate_from_default_config_approves() {
        let gate = KeywordGate::from_config(&GateConfig::default()).unwrap();
        let sender = Identity::new("a");
        assert!(gate.moderate_content("hi", MessageKind::Text).await.approved);
        assert!(!gate.detect_spam(&sender, "hi").await.is_spam);
        assert_eq!(gate.name(), "keyword");
    }
}
