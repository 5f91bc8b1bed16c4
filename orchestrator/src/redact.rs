//! Secret redaction for diagnostics
//!
//! Every string that ends up in a job log, a deployment log, or an error
//! message passes through [`redact`] first. The rules are applied in order:
//!
//! 1. `KEY=value` tokens whose key contains `API_KEY` or `TOKEN` keep the key
//!    and lose the value.
//! 2. JSON-like `"apiKey"`, `"botToken"` and `"token"` string fields
//!    (case-insensitive) lose their value.
//! 3. Anything shaped like a bot authentication token (`<8+ digits>:<20+ chars>`)
//!    is masked wherever it appears.
//!
//! Secrets are always replaced whole by [`PLACEHOLDER`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Replacement for any masked secret
pub const PLACEHOLDER: &str = "***";

static ENV_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z0-9_]*(?:API_KEY|TOKEN)=[^\s]+").expect("static regex")
});

static JSON_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)("(?:apiKey|botToken|token)"\s*:\s*")([^"]+)(")"#).expect("static regex")
});

static BOT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8,}:[A-Za-z0-9_-]{20,}").expect("static regex"));

/// Mask secrets in a diagnostic string.
pub fn redact(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let masked = ENV_ASSIGNMENT.replace_all(text, |caps: &Captures| {
        let assignment = &caps[0];
        match assignment.find('=') {
            Some(idx) => format!("{}{}", &assignment[..=idx], PLACEHOLDER),
            None => PLACEHOLDER.to_string(),
        }
    });

    let masked = JSON_FIELD.replace_all(&masked, |caps: &Captures| {
        format!("{}{}{}", &caps[1], PLACEHOLDER, &caps[3])
    });

    BOT_TOKEN.replace_all(&masked, PLACEHOLDER).into_owned()
}

/// Redact a command line before it is reported.
pub fn redact_args<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let joined = args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" ");
    redact(&format!("{} {}", program, joined))
}
