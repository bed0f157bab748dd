//! Loop detection — recognising a repeating failure despite varying surface text.
//!
//! Raw error strings are normalised to a failure *category* before they are
//! compared, so an advisor inventing a different nonexistent tool on every
//! attempt still reads as one repeating `unknown-tool` failure, while
//! genuinely different failure kinds never line up.

use std::collections::VecDeque;

/// Stable signature of a malformed advisor response.
pub const MALFORMED_SIGNATURE: &str = "advisor-response-malformed";

const MAX_SIGNATURE_CHARS: usize = 120;

/// Map an error message to its normalised failure signature.
///
/// Known failure kinds collapse to a fixed category. Anything else keeps its
/// text, lowercased, with digit runs replaced by `#` and whitespace collapsed,
/// so counters and ids embedded in a message do not make each occurrence
/// unique.
pub fn normalize_failure(error: &str) -> String {
    let e = error.trim().to_lowercase();
    if e.is_empty() {
        return String::new();
    }

    if e.starts_with(MALFORMED_SIGNATURE) {
        return MALFORMED_SIGNATURE.into();
    }
    if e.contains("unknown tool") || e.contains("tool not found") || e.contains("no such tool") {
        return "unknown-tool".into();
    }
    if is_permission_error(&e) {
        return "permission-error".into();
    }
    if e.contains("timeout") || e.contains("timed out") {
        return "timeout".into();
    }
    if is_connection_error(&e) {
        return "connection-failure".into();
    }

    let mut signature = String::with_capacity(e.len());
    let mut in_digits = false;
    for c in e.split_whitespace().collect::<Vec<_>>().join(" ").chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                signature.push('#');
            }
            in_digits = true;
        } else {
            signature.push(c);
            in_digits = false;
        }
    }
    signature.chars().take(MAX_SIGNATURE_CHARS).collect()
}

fn is_permission_error(e: &str) -> bool {
    e.contains("permission denied")
        || e.contains("permission-denied")
        || e.contains("unauthorized")
        || e.contains("forbidden")
        || contains_status(e, "401")
        || contains_status(e, "403")
}

fn is_connection_error(e: &str) -> bool {
    e.contains("connection refused")
        || e.contains("connection reset")
        || e.contains("connection closed")
        || e.contains("connection failed")
        || e.contains("network unreachable")
        || e.contains("host unreachable")
        || e.contains("dns")
        || e.contains("advisor unavailable")
}

/// `code` as a standalone number, not part of a longer one.
fn contains_status(e: &str, code: &str) -> bool {
    e.match_indices(code).any(|(i, _)| {
        let before = e[..i].chars().next_back();
        let after = e[i + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

/// Per-task detector over the last `window` failure signatures.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    window: usize,
    signatures: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            signatures: VecDeque::with_capacity(window),
        }
    }

    /// Record one failed step. `error` is normalised here.
    pub fn record_failure(&mut self, error: &str) {
        if self.signatures.len() == self.window {
            self.signatures.pop_front();
        }
        self.signatures.push_back(normalize_failure(error));
    }

    /// Any success breaks the streak.
    pub fn record_success(&mut self) {
        self.signatures.clear();
    }

    /// True iff the last `window` recorded failures are consecutive, non-empty
    /// and share one category.
    pub fn is_looping(&self) -> bool {
        self.looping_category().is_some()
    }

    pub fn looping_category(&self) -> Option<&str> {
        if self.signatures.len() < self.window {
            return None;
        }
        let first = self.signatures.front()?;
        if first.is_empty() || self.signatures.iter().any(|s| s != first) {
            return None;
        }
        Some(first.as_str())
    }

    pub fn reset(&mut self) {
        self.signatures.clear();
    }
}
