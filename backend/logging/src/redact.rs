//! Log Redaction
//!
//! Scrubs provider API keys and bearer tokens from text before it reaches
//! logs or the terminal. Provider errors often echo request URLs, and Gemini
//! URLs carry the key as a query parameter.

use regex::Regex;
use std::sync::LazyLock;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9_\-]{16,})|(AIza[0-9A-Za-z_\-]{30,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)")
        .expect("static regex")
});
static KEY_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([?&](?:key|api_key)=)[^&\s]+").expect("static regex"));

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = KEY_PARAM_RE.replace_all(input, "${1}[REDACTED]");
    API_KEY_RE.replace_all(&redacted, "[REDACTED_TOKEN]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_keys_and_tokens() {
        let raw = "401 from https://x.test/v1beta/models?key=AIzaSyA-abcdefghijklmnopqrstuvwxyz012345&alt=sse \
                   with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9 and sk-proj-abcdefghijklmnopqrst";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("AIzaSy"));
        assert!(!clean.contains("eyJhbGci"));
        assert!(!clean.contains("sk-proj"));
        assert!(clean.contains("?key=[REDACTED]&alt=sse"));
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(redact_sensitive_data("hook 'greet' failed"), "hook 'greet' failed");
    }
}
