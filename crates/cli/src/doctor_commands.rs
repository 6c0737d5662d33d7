//! `courier doctor`: config validation and provider credential checks.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]`, `[skip]` or `[info]`
//! per item and exits non-zero when anything failed.

use std::path::Path;

use {
    anyhow::Result,
    courier_config::{CourierConfig, Severity, ValidationResult, validate, validate_file},
    courier_gate::KeywordModerator,
};

use crate::provider_commands::provider_statuses;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Skip,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Skip => DIM,
            Self::Info => CYAN,
        }
    }

    fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Fail,
            Severity::Warning => Self::Warn,
            Severity::Info => Self::Info,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: &'static str,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: &'static str) -> Self {
        Self {
            title,
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn count(&self, status: Status) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
        }
        errors += section.count(Status::Fail);
        warnings += section.count(Status::Warn);
        eprintln!();
    }

    (errors, warnings)
}

fn push_diagnostics(section: &mut Section, result: &ValidationResult) {
    for d in &result.diagnostics {
        let message = if d.path.is_empty() {
            d.message.clone()
        } else {
            format!("{}: {}", d.path, d.message)
        };
        section.push(Status::from_severity(d.severity), message);
    }
    if !result.has_errors() && result.count(Severity::Warning) == 0 {
        section.push(Status::Ok, "no issues found");
    }
}

fn check_config(path: Option<&Path>) -> (Section, Option<CourierConfig>) {
    let mut section = Section::new("Config");
    let Some(path) = path else {
        section.push(Status::Info, "no config file found; checking defaults");
        let config = CourierConfig::default();
        push_diagnostics(&mut section, &validate(&config));
        return (section, Some(config));
    };

    section.push(Status::Info, format!("file: {}", path.display()));
    let result = validate_file(path);
    push_diagnostics(&mut section, &result);
    match courier_config::load_config(path) {
        Ok(config) => (section, Some(config)),
        Err(e) => {
            if !result.has_errors() {
                section.push(Status::Fail, format!("failed to load: {e}"));
            }
            (section, None)
        },
    }
}

fn check_gate(config: &CourierConfig) -> Section {
    let mut section = Section::new("Content gate");
    match KeywordModerator::new(&config.gate.rules, config.gate.reject_threshold) {
        Ok(moderator) => section.push(
            Status::Ok,
            format!(
                "{} moderation rule(s), reject threshold {}",
                moderator.rule_count(),
                config.gate.reject_threshold
            ),
        ),
        Err(e) => section.push(Status::Fail, e.to_string()),
    }
    section.push(
        Status::Info,
        format!("spam: messages over {} chars are rejected", config.gate.spam.max_length),
    );
    section
}

fn check_admission(config: &CourierConfig) -> Section {
    let mut section = Section::new("Admission");
    let admission = &config.admission;
    section.push(
        Status::Info,
        format!("{} message(s) per {} ms", admission.limit, admission.window_ms),
    );
    section.push(
        Status::Info,
        if admission.charge_rejected {
            "gate rejections consume a token"
        } else {
            "gate rejections are free"
        },
    );
    section
}

fn check_push(config: &CourierConfig) -> Section {
    let mut section = Section::new("Push providers");
    let statuses = provider_statuses(config);
    if statuses.is_empty() {
        section.push(
            Status::Skip,
            "no providers enabled; offline recipients cannot be notified",
        );
    }
    for status in statuses {
        match status.problem {
            None => section.push(Status::Ok, format!("{} is ready", status.name)),
            Some(problem) => section.push(
                Status::Warn,
                format!("{} will be skipped: {problem}", status.name),
            ),
        }
    }
    section
}

fn run_checks(path: Option<&Path>) -> Vec<Section> {
    let (config_section, config) = check_config(path);
    let mut sections = vec![config_section];
    match config {
        Some(config) => {
            sections.push(check_gate(&config));
            sections.push(check_admission(&config));
            sections.push(check_push(&config));
        },
        None => {
            let mut skipped = Section::new("Components");
            skipped.push(Status::Skip, "config did not load; component checks skipped");
            sections.push(skipped);
        },
    }
    sections
}

pub fn handle_doctor(explicit: Option<&Path>) -> Result<()> {
    let discovered = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => courier_config::find_config_file(),
    };
    let sections = run_checks(discovered.as_deref());
    let (errors, warnings) = print_report(&sections);

    if errors == 0 && warnings == 0 {
        eprintln!("All checks passed.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
