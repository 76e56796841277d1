use anyhow::Result;
use codeclaw_storage::digest::to_hex;
use codeclaw_storage::FindingLayer;
use regex::Regex;
use std::collections::BTreeSet;

use super::{literal_alternation, splice, Hit, Span, TextPass};

/// Shorter names match too much ordinary text
const MIN_USERNAME_LEN: usize = 3;

/// Salted, non-reversible stand-in for a username: `user_` plus 8 hex chars
#[must_use]
pub fn username_token(salt: &str, username: &str) -> String {
    let mac = hmac_sha256::HMAC::mac(username.to_lowercase().as_bytes(), salt.as_bytes());
    let hex = to_hex(&mac);
    format!("user_{}", &hex[..8])
}

/// Replaces known usernames with their salted tokens, case-insensitively
pub struct UsernameHasher {
    pattern: Regex,
    salt: String,
}

impl UsernameHasher {
    /// Returns `None` when no username is long enough to match safely
    ///
    /// # Errors
    ///
    /// Returns an error if the username alternation cannot be compiled
    pub fn new(usernames: &BTreeSet<String>, salt: &str) -> Result<Option<Self>> {
        let Some(alternation) =
            literal_alternation(usernames.iter().map(String::as_str), MIN_USERNAME_LEN, 1)
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            pattern: Regex::new(&format!("(?i)(?:{alternation})"))?,
            salt: salt.to_string(),
        }))
    }
}

impl TextPass for UsernameHasher {
    fn layer(&self) -> FindingLayer {
        FindingLayer::Username
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let spans = self
            .pattern
            .find_iter(text)
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
                kind: "username".to_string(),
                replacement: username_token(&self.salt, m.as_str()),
            })
            .collect();
        splice(text, spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher(names: &[&str]) -> UsernameHasher {
        let names: BTreeSet<String> = names.iter().map(|s| (*s).to_string()).collect();
        UsernameHasher::new(&names, "test-salt").unwrap().unwrap()
    }

    #[test]
    fn test_token_shape_and_stability() {
        let token = username_token("salt-a", "alice");
        assert_eq!(token.len(), "user_".len() + 8);
        assert!(token.starts_with("user_"));
        assert_eq!(token, username_token("salt-a", "ALICE"));
        assert_ne!(token, username_token("salt-b", "alice"));
    }

    #[test]
    fn test_replaces_whole_words_case_insensitively() {
        let (out, hits) = hasher(&["alice"]).apply("Alice pushed, then alice reverted");
        let token = username_token("test-salt", "alice");
        assert_eq!(out, format!("{token} pushed, then {token} reverted"));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].original, "Alice");
    }

    #[test]
    fn test_ignores_embedded_names() {
        let (out, hits) = hasher(&["bob"]).apply("bobcat and kabob");
        assert_eq!(out, "bobcat and kabob");
        assert!(hits.is_empty());
    }

    #[test]
    fn test_short_names_are_skipped() {
        let names: BTreeSet<String> = ["al".to_string()].into_iter().collect();
        assert!(UsernameHasher::new(&names, "salt").unwrap().is_none());
    }
}
