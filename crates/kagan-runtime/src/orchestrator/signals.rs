//! End-of-turn signal parsing (spec §4.11), grounded on the teacher's
//! `signals/parser.rs` regex-per-tag idiom (`LazyLock<Regex>`, case folding,
//! `captures_iter` over the tail of the output), generalized from Claude's
//! `<progress>`/`<blocker>`/`<pivot>` tags to Kagan's closed signal set with
//! a fixed priority order instead of "collect everything".

use regex::Regex;
use std::sync::LazyLock;

static COMPLETE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<complete\s*/>").unwrap());

static BLOCKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<blocked\s+reason="([^"]*)"\s*/>"#).unwrap());

static CONTINUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<continue\s*/>").unwrap());

static APPROVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<approve\s+summary="([^"]*)"(?:\s+approach="([^"]*)")?(?:\s+key_files="([^"]*)")?\s*/>"#)
        .unwrap()
});

static REJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<reject\s+reason="([^"]*)"\s*/>"#).unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    Complete,
    Blocked { reason: String },
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewSignal {
    Approve { summary: String, approach: Option<String>, key_files: Option<String> },
    Reject { reason: String },
}

/// Priority order (first match wins): COMPLETE, BLOCKED, CONTINUE. An
/// `<approve/>` tag appearing in worker output never substitutes for
/// COMPLETE (spec §8 boundary behavior) — it simply isn't one of the
/// tags this parser looks for.
pub fn parse_worker_signal(output: &str) -> Option<WorkerSignal> {
    if COMPLETE_RE.is_match(output) {
        return Some(WorkerSignal::Complete);
    }
    if let Some(caps) = BLOCKED_RE.captures(output) {
        return Some(WorkerSignal::Blocked {
            reason: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
        });
    }
    if CONTINUE_RE.is_match(output) {
        return Some(WorkerSignal::Continue);
    }
    None
}

/// Review agent output is parsed for `<approve/>`/`<reject/>` only; a
/// review timeout is treated as not-approved by the caller, not by this
/// function (spec §4.11 "Review timeouts are treated as not-approved").
pub fn parse_review_signal(output: &str) -> Option<ReviewSignal> {
    if let Some(caps) = APPROVE_RE.captures(output) {
        return Some(ReviewSignal::Approve {
            summary: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            approach: caps.get(2).map(|m| m.as_str().to_string()),
            key_files: caps.get(3).map(|m| m.as_str().to_string()),
        });
    }
    if let Some(caps) = REJECT_RE.captures(output) {
        return Some(ReviewSignal::Reject {
            reason: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_beats_blocked_when_both_present() {
        let output = "some output <blocked reason=\"x\"/> more <complete/>";
        assert_eq!(parse_worker_signal(output), Some(WorkerSignal::Complete));
    }

    #[test]
    fn blocked_beats_continue_when_both_present() {
        let output = "<continue/> then <blocked reason=\"need creds\"/>";
        assert_eq!(
            parse_worker_signal(output),
            Some(WorkerSignal::Blocked { reason: "need creds".to_string() })
        );
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!(parse_worker_signal("<COMPLETE/>"), Some(WorkerSignal::Complete));
    }

    #[test]
    fn approve_in_worker_output_never_substitutes_for_complete() {
        let output = "<approve summary=\"LGTM\"/>";
        assert_eq!(parse_worker_signal(output), None);
    }

    #[test]
    fn no_recognized_tag_yields_none() {
        assert_eq!(parse_worker_signal("just some prose"), None);
    }

    #[test]
    fn approve_signal_parses_optional_fields() {
        let output = r#"<approve summary="LGTM" approach="straightforward" key_files="src/lib.rs"/>"#;
        match parse_review_signal(output) {
            Some(ReviewSignal::Approve { summary, approach, key_files }) => {
                assert_eq!(summary, "LGTM");
                assert_eq!(approach.as_deref(), Some("straightforward"));
                assert_eq!(key_files.as_deref(), Some("src/lib.rs"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reject_signal_parses_reason() {
        let output = r#"<reject reason="missing tests"/>"#;
        assert_eq!(
            parse_review_signal(output),
            Some(ReviewSignal::Reject { reason: "missing tests".to_string() })
        );
    }
}
