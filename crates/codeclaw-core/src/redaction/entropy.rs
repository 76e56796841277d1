use anyhow::Result;
use codeclaw_storage::FindingLayer;
use regex::Regex;
use std::collections::HashMap;

use super::{splice, Hit, Span, TextPass, REDACTED};

const MIN_ENTROPY: f64 = 4.0;
const MAX_DOTS: usize = 2;
const MAX_SLASHES: usize = 2;

/// Shannon entropy in bits per character
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn shannon_entropy(s: &str) -> f64 {
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut len = 0usize;
    for c in s.chars() {
        *freq.entry(c).or_default() += 1;
        len += 1;
    }
    if len == 0 {
        return 0.0;
    }
    let len = len as f64;
    -freq
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            p * p.log2()
        })
        .sum::<f64>()
}

pub(crate) fn mixes_character_classes(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_uppercase())
        && s.chars().any(|c| c.is_ascii_lowercase())
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Catches random-looking tokens that no named pattern knows about
pub struct EntropyScanner {
    candidates: Regex,
}

impl EntropyScanner {
    /// # Errors
    ///
    /// Returns an error if the candidate pattern fails to compile
    pub fn new() -> Result<Self> {
        Ok(Self {
            candidates: Regex::new(r"[A-Za-z0-9_/+=.-]{32,}")?,
        })
    }

    fn looks_secret(token: &str) -> bool {
        token.matches('.').count() <= MAX_DOTS
            && token.matches('/').count() <= MAX_SLASHES
            && mixes_character_classes(token)
            && shannon_entropy(token) >= MIN_ENTROPY
    }
}

impl TextPass for EntropyScanner {
    fn layer(&self) -> FindingLayer {
        FindingLayer::Entropy
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let spans = self
            .candidates
            .find_iter(text)
            .filter(|m| Self::looks_secret(m.as_str()))
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
                kind: "high_entropy".to_string(),
                replacement: REDACTED.to_string(),
            })
            .collect();
        splice(text, spans)
    }
}
