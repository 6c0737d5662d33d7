//! Configuration validation engine.
//!
//! Checks a loaded [`CourierConfig`] for values that would make a component
//! misbehave, and checks raw config files for syntax errors, unknown keys,
//! and unresolved `${ENV}` placeholders.

use std::{collections::HashSet, path::Path};

use secrecy::ExposeSecret;

use crate::{env_subst, schema::CourierConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "range", "provider", "env"
    pub category: &'static str,
    /// Dotted path, e.g. "admission.window_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

// ── Semantic checks ─────────────────────────────────────────────────────────

/// Validate a loaded config.
#[must_use]
pub fn validate(config: &CourierConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_admission(config, &mut result);
    check_gate(config, &mut result);
    check_push(config, &mut result);
    result
}

fn check_admission(config: &CourierConfig, result: &mut ValidationResult) {
    let admission = &config.admission;
    if admission.limit == 0 {
        result.push(
            Severity::Warning,
            "range",
            "admission.limit",
            "limit is 0, every send will be throttled",
        );
    }
    if admission.window_ms == 0 {
        result.push(
            Severity::Error,
            "range",
            "admission.window_ms",
            "window must be greater than 0",
        );
    }
    if admission.sweep_interval_ms == 0 {
        result.push(
            Severity::Error,
            "range",
            "admission.sweep_interval_ms",
            "sweep interval must be greater than 0",
        );
    }
}

fn check_unit(result: &mut ValidationResult, path: &str, value: f32) {
    if !(0.0..=1.0).contains(&value) {
        result.push(
            Severity::Error,
            "range",
            path,
            format!("{value} is outside 0.0..=1.0"),
        );
    }
}

fn check_gate(config: &CourierConfig, result: &mut ValidationResult) {
    let gate = &config.gate;
    check_unit(result, "gate.reject_threshold", gate.reject_threshold);

    let mut seen = HashSet::new();
    for (i, rule) in gate.rules.iter().enumerate() {
        let path = format!("gate.rules[{i}]");
        if rule.code.trim().is_empty() {
            result.push(Severity::Error, "range", &path, "rule code is empty");
        } else if !seen.insert(rule.code.as_str()) {
            result.push(
                Severity::Warning,
                "range",
                &path,
                format!("duplicate rule code \"{}\"", rule.code),
            );
        }
        if rule.terms.iter().all(|t| t.trim().is_empty()) {
            result.push(
                Severity::Warning,
                "range",
                &path,
                "rule has no terms and will never match",
            );
        }
        check_unit(result, &format!("{path}.weight"), rule.weight);
    }

    let spam = &gate.spam;
    if spam.max_length == 0 {
        result.push(
            Severity::Error,
            "range",
            "gate.spam.max_length",
            "max_length must be greater than 0",
        );
    }
    for (path, value) in [
        ("gate.spam.length_confidence", spam.length_confidence),
        ("gate.spam.spam_threshold", spam.spam_threshold),
        ("gate.spam.link_confidence", spam.link_confidence),
        ("gate.spam.repetition_ratio", spam.repetition_ratio),
        ("gate.spam.repetition_confidence", spam.repetition_confidence),
        ("gate.spam.duplicate_confidence", spam.duplicate_confidence),
    ] {
        check_unit(result, path, value);
    }
}

fn missing_secret(secret: Option<&secrecy::Secret<String>>) -> bool {
    secret.is_none_or(|s| s.expose_secret().trim().is_empty())
}

fn check_push(config: &CourierConfig, result: &mut ValidationResult) {
    let push = &config.push;
    if push.send_timeout_ms == 0 {
        result.push(
            Severity::Error,
            "range",
            "push.send_timeout_ms",
            "send timeout must be greater than 0",
        );
    }

    let mut enabled = 0;
    if let Some(apns) = push.apns.as_ref().filter(|c| c.enabled) {
        enabled += 1;
        for (field, value) in [
            ("key_id", &apns.key_id),
            ("team_id", &apns.team_id),
            ("topic", &apns.topic),
        ] {
            if value.trim().is_empty() {
                result.push(
                    Severity::Error,
                    "provider",
                    format!("push.apns.{field}"),
                    "required when APNs is enabled",
                );
            }
        }
        if missing_secret(apns.private_key_pem.as_ref()) {
            result.push(
                Severity::Error,
                "provider",
                "push.apns.private_key_pem",
                "required when APNs is enabled",
            );
        }
    }
    if let Some(fcm) = push.fcm.as_ref().filter(|c| c.enabled) {
        enabled += 1;
        if fcm.project_id.trim().is_empty() {
            result.push(
                Severity::Error,
                "provider",
                "push.fcm.project_id",
                "required when FCM is enabled",
            );
        }
        if missing_secret(fcm.access_token.as_ref()) {
            result.push(
                Severity::Error,
                "provider",
                "push.fcm.access_token",
                "required when FCM is enabled",
            );
        }
    }
    if let Some(web) = push.web_push.as_ref().filter(|c| c.enabled) {
        enabled += 1;
        if missing_secret(web.vapid_private_key_pem.as_ref()) {
            result.push(
                Severity::Error,
                "provider",
                "push.web_push.vapid_private_key_pem",
                "required when web push is enabled",
            );
        }
    }
    if enabled == 0 {
        result.push(
            Severity::Info,
            "provider",
            "push",
            "no push providers enabled, offline recipients will not be notified",
        );
    }
}

// ── File checks ─────────────────────────────────────────────────────────────

/// Allowed keys per section of a TOML config file.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("admission", &[
        "limit",
        "window_ms",
        "sweep_interval_ms",
        "charge_rejected",
    ]),
    ("gate", &["rules", "reject_threshold", "spam"]),
    ("dispatch", &[
        "push_fallback_on_live_failure",
        "preview_chars",
        "web_url_base",
    ]),
    ("push", &[
        "send_timeout_ms",
        "job_ttl_ms",
        "max_tracked_jobs",
        "apns",
        "fcm",
        "web_push",
    ]),
    ("metrics", &["enabled", "labels"]),
];

/// Validate a config file on disk: syntax, unknown keys, env placeholders,
/// then the semantic checks of [`validate`].
#[must_use]
pub fn validate_file(path: &Path) -> ValidationResult {
    let mut result = ValidationResult {
        config_path: Some(path.to_path_buf()),
        ..Default::default()
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read {}: {e}", path.display()),
            );
            return result;
        },
    };

    for var in env_subst::unresolved_vars(&raw) {
        result.push(
            Severity::Warning,
            "env",
            "",
            format!("environment variable {var} is not set"),
        );
    }

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");
    if is_toml {
        let substituted = env_subst::substitute_env(&raw);
        match toml::from_str::<toml::Table>(&substituted) {
            Ok(table) => check_unknown_keys(&table, &mut result),
            Err(e) => {
                result.push(Severity::Error, "syntax", "", e.to_string());
                return result;
            },
        }
    }

    match crate::loader::load_config(path) {
        Ok(config) => result.diagnostics.extend(validate(&config).diagnostics),
        Err(e) => result.push(Severity::Error, "syntax", "", e.to_string()),
    }
    result
}

fn check_unknown_keys(table: &toml::Table, result: &mut ValidationResult) {
    for (section, value) in table {
        let Some((_, known)) = KNOWN_SECTIONS.iter().find(|(name, _)| name == section) else {
            result.push(
                Severity::Warning,
                "unknown-field",
                section.clone(),
                "unknown section",
            );
            continue;
        };
        let Some(inner) = value.as_table() else {
            continue;
        };
        for key in inner.keys() {
            if !known.contains(&key.as_str()) {
                result.push(
                    Severity::Warning,
                    "unknown-field",
                    format!("{section}.{key}"),
                    "unknown field",
                );
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{FcmConfig, ModerationRule},
    };

    #[test]
    fn default_config_has_no_errors() {
        let result = validate(&CourierConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Info), 1);
    }

    #[test]
    fn zero_window_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.admission.window_ms = 0;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "admission.window_ms")
        );
    }

    #[test]
    fn rule_weight_out_of_range() {
        let mut cfg = CourierConfig::default();
        cfg.gate.rules.push(ModerationRule {
            code: "abuse".into(),
            terms: vec!["x".into()],
            weight: 1.5,
        });
        let result = validate(&cfg);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "gate.rules[0].weight" && d.severity == Severity::Error)
        );
    }

    #[test]
    fn enabled_provider_without_credentials() {
        let mut cfg = CourierConfig::default();
        cfg.push.fcm = Some(FcmConfig::default());
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
        assert_eq!(result.count(Severity::Info), 0);
    }

    #[test]
    fn file_with_unknown_key_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[admission]\nlimt = 3\n\n[bogus]\nx = 1\n").unwrap();
        let result = validate_file(&path);
        let unknown: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.category == "unknown-field")
            .map(|d| d.path.as_str())
            .collect();
        assert!(unknown.contains(&"admission.limt"));
        assert!(unknown.contains(&"bogus"));
    }

    #[test]
    fn file_with_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[admission\nlimit = ").unwrap();
        let result = validate_file(&path);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }
}
