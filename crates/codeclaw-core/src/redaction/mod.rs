//! Six-pass privacy engine.
//!
//! Passes run in a fixed order over message content, reasoning traces and
//! every tool-input payload, each pass seeing the output of the previous
//! one: paths, usernames, secret patterns, entropy, emails, custom strings.

mod custom;
mod email;
mod entropy;
mod paths;
mod secrets;
mod usernames;

#[cfg(test)]
mod tests;

use anyhow::Result;
use codeclaw_storage::{
    Defect, Finding, FindingLayer, Location, Message, RedactedSession, Session, TextField,
};
use std::collections::BTreeSet;

pub use custom::CustomMatcher;
pub use email::EmailScanner;
pub(crate) use entropy::mixes_character_classes;
pub use entropy::{shannon_entropy, EntropyScanner};
pub use paths::PathAnonymizer;
pub use secrets::SecretScanner;
pub use usernames::{username_token, UsernameHasher};

/// Replacement for secrets, high-entropy tokens and custom strings
pub const REDACTED: &str = "[REDACTED]";
/// Replacement for email addresses
pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";
/// More findings than this sends a session to quarantine
pub const DEFAULT_QUARANTINE_THRESHOLD: usize = 3;

/// What the engine should look for beyond its built-in patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactionRules {
    pub usernames: BTreeSet<String>,
    pub custom_strings: BTreeSet<String>,
    /// Extra project roots; the session's own working directory is always one
    pub path_roots: BTreeSet<String>,
    pub home_dir: Option<String>,
    /// Install-local secret keying the username tokens
    pub salt: String,
}

impl RedactionRules {
    /// Rules for this machine: current user and home directory plus the configured lists
    #[must_use]
    pub fn for_machine(
        salt: String,
        usernames: &BTreeSet<String>,
        custom_strings: &BTreeSet<String>,
    ) -> Self {
        let mut all_usernames = usernames.clone();
        if let Some(user) = machine_username() {
            all_usernames.insert(user);
        }
        Self {
            usernames: all_usernames,
            custom_strings: custom_strings.clone(),
            path_roots: BTreeSet::new(),
            home_dir: dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
            salt,
        }
    }
}

fn machine_username() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
}

/// One replacement made by a pass inside a single text field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub kind: String,
    pub original: String,
    pub replacement: String,
}

/// Matched byte range waiting to be spliced
#[derive(Debug, Clone)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: String,
    pub replacement: String,
}

/// Replace ascending, non-overlapping spans. Spans whose text already equals
/// the replacement are left alone so no finding is ever a no-op.
pub(crate) fn splice(text: &str, spans: Vec<Span>) -> (String, Vec<Hit>) {
    let mut out = String::with_capacity(text.len());
    let mut hits = Vec::with_capacity(spans.len());
    let mut last = 0;

    for span in spans {
        let original = &text[span.start..span.end];
        if original == span.replacement {
            continue;
        }
        out.push_str(&text[last..span.start]);
        out.push_str(&span.replacement);
        hits.push(Hit {
            kind: span.kind,
            original: original.to_string(),
            replacement: span.replacement,
        });
        last = span.end;
    }
    out.push_str(&text[last..]);
    (out, hits)
}

/// Alternation over literal strings, longest first. Word boundaries are
/// added on edges that are word characters, for strings of `boundary_min` or more.
pub(crate) fn literal_alternation<'a>(
    literals: impl IntoIterator<Item = &'a str>,
    min_len: usize,
    boundary_min: usize,
) -> Option<String> {
    let mut literals: Vec<&str> = literals
        .into_iter()
        .map(str::trim)
        .filter(|s| s.chars().count() >= min_len)
        .collect();
    if literals.is_empty() {
        return None;
    }
    literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    literals.dedup();

    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let parts: Vec<String> = literals
        .iter()
        .map(|lit| {
            let escaped = regex::escape(lit);
            if lit.chars().count() < boundary_min {
                return escaped;
            }
            let head = if is_word(lit.chars().next()) { r"\b" } else { "" };
            let tail = if is_word(lit.chars().last()) { r"\b" } else { "" };
            format!("{head}{escaped}{tail}")
        })
        .collect();
    Some(parts.join("|"))
}

/// A single privacy pass over one text field
pub(crate) trait TextPass {
    fn layer(&self) -> FindingLayer;

    /// Returns the rewritten text and what was replaced
    fn apply(&self, text: &str) -> (String, Vec<Hit>);
}

/// Compiled engine. Build once, reuse for every session.
pub struct RedactionEngine {
    rules: RedactionRules,
    usernames: Option<UsernameHasher>,
    secrets: SecretScanner,
    entropy: EntropyScanner,
    emails: EmailScanner,
    custom: Option<CustomMatcher>,
    quarantine_threshold: usize,
}

impl RedactionEngine {
    /// Compile every pass for the given rules
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile
    pub fn new(rules: RedactionRules, quarantine_threshold: usize) -> Result<Self> {
        let usernames = UsernameHasher::new(&rules.usernames, &rules.salt)?;
        let custom = CustomMatcher::new(&rules.custom_strings)?;
        log::debug!(
            "Redaction engine ready: {} usernames, {} custom strings, {} path roots",
            rules.usernames.len(),
            rules.custom_strings.len(),
            rules.path_roots.len()
        );
        Ok(Self {
            usernames,
            secrets: SecretScanner::new()?,
            entropy: EntropyScanner::new()?,
            emails: EmailScanner::new()?,
            custom,
            quarantine_threshold,
            rules,
        })
    }

    #[must_use]
    pub fn quarantine_threshold(&self) -> usize {
        self.quarantine_threshold
    }

    /// Run all passes over a session.
    ///
    /// Malformed messages are dropped and recorded as defects; the rest of
    /// the session is still processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the per-session path pattern cannot be compiled
    pub fn redact(&self, session: &Session) -> Result<RedactedSession> {
        let paths = PathAnonymizer::new(
            self.rules
                .path_roots
                .iter()
                .map(String::as_str)
                .chain(session.cwd.as_deref()),
            self.rules.home_dir.as_deref(),
        )?;

        let mut passes: Vec<&dyn TextPass> = Vec::with_capacity(6);
        if let Some(paths) = &paths {
            passes.push(paths);
        }
        if let Some(usernames) = &self.usernames {
            passes.push(usernames);
        }
        passes.push(&self.secrets);
        passes.push(&self.entropy);
        passes.push(&self.emails);
        if let Some(custom) = &self.custom {
            passes.push(custom);
        }

        let mut cleaned = session.clone();
        let mut defects = Vec::new();
        let mut messages = Vec::with_capacity(session.messages.len());
        // One bucket per pass keeps findings ordered by pass, then message, then field
        let mut buckets: Vec<Vec<Finding>> = vec![Vec::new(); passes.len()];

        for (original_idx, message) in session.messages.iter().enumerate() {
            if let Err(reason) = message.validate() {
                log::warn!(
                    "Dropping malformed message {original_idx} of session {}: {reason}",
                    session.session_id
                );
                defects.push(Defect {
                    message_index: original_idx,
                    reason,
                });
                continue;
            }
            let idx = messages.len();
            messages.push(redact_message(message, idx, &passes, &mut buckets));
        }

        cleaned.messages = messages;
        if !defects.is_empty() {
            cleaned.recount();
        }

        let findings: Vec<Finding> = buckets.into_iter().flatten().collect();
        let redacted =
            RedactedSession::new(cleaned, findings, defects, self.quarantine_threshold);
        if redacted.is_quarantined() {
            log::info!(
                "Session {} flagged for quarantine with {} findings",
                session.session_id,
                redacted.finding_count()
            );
        }
        Ok(redacted)
    }
}

fn redact_message(
    message: &Message,
    idx: usize,
    passes: &[&dyn TextPass],
    buckets: &mut [Vec<Finding>],
) -> Message {
    let mut out = message.clone();

    if let Some(content) = &message.content {
        out.content = Some(redact_field(content, idx, TextField::Content, passes, buckets));
    }
    if let Some(thinking) = &message.thinking {
        out.thinking = Some(redact_field(
            thinking,
            idx,
            TextField::Thinking,
            passes,
            buckets,
        ));
    }
    for (tool_idx, tool_use) in out.tool_uses.iter_mut().enumerate() {
        tool_use.input = redact_field(
            &tool_use.input,
            idx,
            TextField::ToolInput(tool_idx),
            passes,
            buckets,
        );
    }
    out
}

fn redact_field(
    text: &str,
    message: usize,
    field: TextField,
    passes: &[&dyn TextPass],
    buckets: &mut [Vec<Finding>],
) -> String {
    let mut current = text.to_string();
    for (pass, bucket) in passes.iter().zip(buckets.iter_mut()) {
        let (next, hits) = pass.apply(&current);
        bucket.extend(hits.into_iter().map(|hit| Finding {
            layer: pass.layer(),
            kind: hit.kind,
            location: Location { message, field },
            original: hit.original,
            replacement: hit.replacement,
        }));
        current = next;
    }
    current
}

/// One-shot redaction with the default quarantine threshold
///
/// # Errors
///
/// Returns an error if a pattern fails to compile
pub fn redact(session: &Session, rules: &RedactionRules) -> Result<RedactedSession> {
    RedactionEngine::new(rules.clone(), DEFAULT_QUARANTINE_THRESHOLD)?.redact(session)
}
