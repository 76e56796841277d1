use anyhow::Result;
use codeclaw_storage::FindingLayer;
use regex::{Regex, RegexSet};

use super::{splice, Hit, Span, TextPass, REDACTED_EMAIL};

/// Service and documentation addresses that identify nobody
const ALLOWED: &[&str] = &[
    r"(?i)^noreply@",
    r"(?i)^no-reply@",
    r"(?i)@example\.(?:com|org|net)$",
    r"(?i)@localhost",
    r"(?i)@users\.noreply\.github\.com$",
    r"(?i)@github\.com$",
    r"(?i)@anthropic\.com$",
];

pub struct EmailScanner {
    pattern: Regex,
    allowed: RegexSet,
}

impl EmailScanner {
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"\b[A-Za-z0-9._%+-]{2,}@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?,
            allowed: RegexSet::new(ALLOWED)?,
        })
    }
}

impl TextPass for EmailScanner {
    fn layer(&self) -> FindingLayer {
        FindingLayer::Email
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let spans = self
            .pattern
            .find_iter(text)
            .filter(|m| !self.allowed.is_match(m.as_str()))
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
                kind: "email".to_string(),
                replacement: REDACTED_EMAIL.to_string(),
            })
            .collect();
        splice(text, spans)
    }
}
