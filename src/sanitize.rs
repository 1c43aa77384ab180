//! Error-message scrubbing.
//!
//! Adapter and runtime failures can embed filesystem paths, GUIDs, bearer
//! tokens, IPs, and port numbers. Before any message is sent to a client it
//! passes through `scrub`, which replaces those with neutral placeholders,
//! collapses whitespace, and truncates at a word boundary. The untruncated
//! original only ever reaches the host log.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hard ceiling on a sanitized message, in bytes.
const MAX_MESSAGE_LEN: usize = 300;

// ─── Pattern registry ─────────────────────────────────────────────────────────

/// Substitutions applied in order. Paths go first so that path segments are
/// not half-eaten by the token pattern, GUIDs before tokens for the same
/// reason, and IPs before the port pattern so `host:port` collapses cleanly.
static SUBSTITUTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        // UNC and device-namespace paths (\\server\share, \\?\C:\…)
        (
            Regex::new(r#"\\\\[^\s"'<>|]+"#).expect("regex: unc path"),
            "[path]",
        ),
        // Windows drive paths
        (
            Regex::new(r#"(?i)\b[a-z]:[\\/][^\s"'<>|:*?]*"#).expect("regex: drive path"),
            "[path]",
        ),
        // Unix absolute paths (two or more components)
        (
            Regex::new(r"(?:/[\w.+~\-]+){2,}/?").expect("regex: unix path"),
            "[path]",
        ),
        // GUIDs
        (
            Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
                .expect("regex: guid"),
            "[guid]",
        ),
        // Long base64-ish runs (tokens, keys)
        (
            Regex::new(r"\b[A-Za-z0-9+/_\-]{32,}={0,2}\b").expect("regex: token"),
            "[token]",
        ),
        // IPv4 literals
        (
            Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("regex: ipv4"),
            "[ip]",
        ),
        // Port suffixes
        (
            Regex::new(r":\d{2,5}\b").expect("regex: port"),
            "[port]",
        ),
    ]
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("regex: whitespace"));

// ─── Scrubbing ────────────────────────────────────────────────────────────────

/// Scrub one error message for transmission to a client.
pub fn scrub(message: &str) -> String {
    let mut out = message.to_string();
    for (pattern, replacement) in SUBSTITUTIONS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, *replacement).to_string();
        }
    }
    let out = WHITESPACE.replace_all(&out, " ").trim().to_string();
    truncate_at_word(&out, MAX_MESSAGE_LEN)
}

/// Collapsed form for kinds whose detail must never leave the process.
/// Access-control and cryptographic failures carry no message at all.
pub fn access_denied() -> String {
    "ExceptionKind: Access denied".to_string()
}

/// Truncate to at most `max` bytes, cutting at the last word boundary that
/// fits. Falls back to a plain char-boundary cut for a single long word.
fn truncate_at_word(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let head = &s[..end];
    let cut = head.rfind(char::is_whitespace).unwrap_or(end);
    head[..cut].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_unix_path() {
        let out = scrub("could not open /home/alice/Documents/report.txt for reading");
        assert!(out.contains("[path]"), "{out}");
        assert!(!out.contains("alice"));
    }

    #[test]
    fn scrubs_windows_and_unc_paths() {
        let out = scrub(r"failed on C:\Users\bob\file.txt and \\server\share\x");
        assert!(!out.contains("bob"));
        assert!(!out.contains("server"));
        assert_eq!(out.matches("[path]").count(), 2);
    }

    #[test]
    fn scrubs_guid_before_token_pattern() {
        let out = scrub("object 550e8400-e29b-41d4-a716-446655440000 missing");
        assert!(out.contains("[guid]"), "{out}");
        assert!(!out.contains("[token]"));
    }

    #[test]
    fn scrubs_long_token() {
        let out = scrub("auth failed for Zm9vYmFyYmF6cXV4QUJDREVGMTIzNDU2Nzg5MA");
        assert!(out.contains("[token]"), "{out}");
    }

    #[test]
    fn scrubs_ip_and_port() {
        let out = scrub("refused by 127.0.0.1:52345");
        assert!(out.contains("[ip]"), "{out}");
        assert!(out.contains("[port]"), "{out}");
        assert!(!out.contains("52345"));
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(scrub("a   b\n\tc"), "a b c");
    }

    #[test]
    fn truncates_at_word_boundary() {
        let long = "word ".repeat(100);
        let out = scrub(&long);
        assert!(out.len() <= 300);
        assert!(!out.ends_with(' '));
        assert!(out.ends_with("word"));
    }

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(scrub("action not executable"), "action not executable");
    }
}
