//! `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution for raw config text.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok()
});

/// Replace placeholders with process environment values.
///
/// Unresolvable variables without a fallback are left as-is so the
/// validator can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Names of placeholders that would stay unresolved in `input`.
pub fn unresolved_vars(input: &str) -> Vec<String> {
    unresolved_vars_with(input, |name| std::env::var(name).ok())
}

fn unresolved_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(input)
        .filter(|caps| caps.get(2).is_none() && lookup(&caps[1]).is_none())
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "COURIER_FCM_TOKEN" => Some("tok".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("access_token = \"${COURIER_FCM_TOKEN}\"", lookup),
            "access_token = \"tok\""
        );
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(substitute_env_with("${COURIER_LIMIT:-30}", lookup), "30");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${COURIER_MISSING}", lookup),
            "${COURIER_MISSING}"
        );
        assert_eq!(unresolved_vars_with("${COURIER_MISSING} ${COURIER_FCM_TOKEN}", lookup), vec![
            "COURIER_MISSING".to_string()
        ]);
    }

    #[test]
    fn malformed_placeholder_is_literal() {
        assert_eq!(substitute_env_with("${COURIER_FCM_TOKEN", lookup), "${COURIER_FCM_TOKEN");
        assert_eq!(substitute_env_with("plain text", lookup), "plain text");
    }
}
