use anyhow::Result;
use codeclaw_storage::FindingLayer;
use regex::Regex;
use std::collections::BTreeSet;

use super::{literal_alternation, splice, Hit, Span, TextPass, REDACTED};

const MIN_CUSTOM_LEN: usize = 3;
/// Strings at least this long only match on word boundaries
const BOUNDARY_MIN_LEN: usize = 4;
/// Replacement tokens left by earlier passes
const PLACEHOLDER: &str = r"\[(?:REDACTED[A-Z_]*|PROJECT)\]";

/// User blocklist of literal strings (company names, internal hosts, ...)
pub struct CustomMatcher {
    pattern: Regex,
    placeholder: Regex,
}

impl CustomMatcher {
    /// Returns `None` when no configured string is long enough to use
    ///
    /// # Errors
    ///
    /// Returns an error if the alternation cannot be compiled
    pub fn new(strings: &BTreeSet<String>) -> Result<Option<Self>> {
        let Some(alternation) = literal_alternation(
            strings.iter().map(String::as_str),
            MIN_CUSTOM_LEN,
            BOUNDARY_MIN_LEN,
        ) else {
            return Ok(None);
        };
        Ok(Some(Self {
            pattern: Regex::new(&alternation)?,
            placeholder: Regex::new(PLACEHOLDER)?,
        }))
    }
}

impl TextPass for CustomMatcher {
    fn layer(&self) -> FindingLayer {
        FindingLayer::Custom
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let placeholders: Vec<(usize, usize)> = self
            .placeholder
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        let spans = self
            .pattern
            .find_iter(text)
            .filter(|m| {
                !placeholders
                    .iter()
                    .any(|&(start, end)| m.start() < end && start < m.end())
            })
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
                kind: "custom".to_string(),
                replacement: REDACTED.to_string(),
            })
            .collect();
        splice(text, spans)
    }
}
