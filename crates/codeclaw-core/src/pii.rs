//! Advisory rescan of a redacted export for anything that still looks
//! personal or secret. Findings are reported to the reviewer before
//! confirmation; they never block it.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::redaction::{mixes_character_classes, shannon_entropy};

const MAX_PER_CATEGORY: usize = 20;
const MAX_HIGH_ENTROPY: usize = 15;
const MIN_ENTROPY: f64 = 4.0;
const CONTEXT_CHARS: usize = 40;

const FALSE_POSITIVE_EMAILS: &[&str] = &[
    "noreply",
    "pytest.fixture",
    "mcp.tool",
    "mcp.resource",
    "server.tool",
    "tasks.loop",
    "github.com",
];
const FALSE_POSITIVE_KEYS: &[&str] = &["sk-notification"];

/// Shapes the named-secret scan already reports
const KNOWN_PREFIXES: &[&str] = &[
    "eyJ", "ghp_", "gho_", "ghs_", "ghr_", "sk-", "hf_", "AKIA", "pypi-", "npm_", "xox",
];
const BENIGN_PREFIXES: &[&str] = &[
    "https://", "http://", "sha256-", "sha384-", "sha512-", "sha1-", "data:", "file://",
    "mailto:",
];
const BENIGN_SUBSTRINGS: &[&str] = &[
    "node_modules",
    "[redacted]",
    "package-lock",
    "webpack",
    "babel",
    "eslint",
    ".chunk.",
    "vendor/",
    "dist/",
    "build/",
];
const FILE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".jsx", ".css", ".html", ".json", ".yaml", ".yml", ".toml",
    ".md", ".rst", ".txt", ".sh", ".go", ".rs", ".java", ".rb", ".php", ".c", ".h", ".cpp",
    ".hpp", ".swift", ".kt", ".lock", ".cfg", ".ini", ".xml", ".svg", ".png", ".jpg", ".gif",
    ".woff", ".ttf", ".map", ".vue", ".scss", ".less", ".sql", ".env", ".log",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighEntropyFinding {
    pub token: String,
    pub entropy: f64,
    /// Surrounding text of the first occurrence, newlines flattened
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PiiReport {
    pub emails: Vec<String>,
    pub jwt_tokens: Vec<String>,
    pub api_keys: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub high_entropy: Vec<HighEntropyFinding>,
}

impl PiiReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.emails.len()
            + self.jwt_tokens.len()
            + self.api_keys.len()
            + self.ip_addresses.len()
            + self.high_entropy.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Non-empty categories with their values, for display
    #[must_use]
    pub fn categories(&self) -> Vec<(&'static str, Vec<String>)> {
        let high_entropy = self.high_entropy.iter().map(|f| f.token.clone()).collect();
        [
            ("emails", self.emails.clone()),
            ("jwt_tokens", self.jwt_tokens.clone()),
            ("api_keys", self.api_keys.clone()),
            ("ip_addresses", self.ip_addresses.clone()),
            ("high_entropy_strings", high_entropy),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .collect()
    }
}

pub struct PiiScanner {
    email: Regex,
    jwt: Regex,
    api_key: Regex,
    ip: Regex,
    candidate: Regex,
    uuid: Regex,
}

impl PiiScanner {
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile
    pub fn new() -> Result<Self> {
        Ok(Self {
            email: Regex::new(r"[a-zA-Z0-9.+-]+@[a-zA-Z0-9.-]+\.[a-z]{2,}")?,
            jwt: Regex::new(r"eyJ[A-Za-z0-9_-]{20,}")?,
            api_key: Regex::new(r"(?:ghp_|sk-|hf_)[A-Za-z0-9_-]{10,}")?,
            ip: Regex::new(r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}")?,
            candidate: Regex::new(r"[A-Za-z0-9_/+=.-]{20,}")?,
            uuid: Regex::new(
                r"^[0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12}$",
            )?,
        })
    }

    #[must_use]
    pub fn scan(&self, body: &str) -> PiiReport {
        let emails = capped(self.email.find_iter(body).map(|m| m.as_str()).filter(|m| {
            !FALSE_POSITIVE_EMAILS.iter().any(|fp| m.contains(fp))
        }));
        let api_keys = capped(
            self.api_key
                .find_iter(body)
                .map(|m| m.as_str())
                .filter(|m| !FALSE_POSITIVE_KEYS.iter().any(|fp| m.starts_with(fp))),
        );
        PiiReport {
            emails,
            jwt_tokens: capped(self.jwt.find_iter(body).map(|m| m.as_str())),
            api_keys,
            ip_addresses: capped(self.ip.find_iter(body).map(|m| m.as_str())),
            high_entropy: self.high_entropy(body),
        }
    }

    fn high_entropy(&self, body: &str) -> Vec<HighEntropyFinding> {
        let mut seen = HashSet::new();
        let mut findings: Vec<HighEntropyFinding> = self
            .candidate
            .find_iter(body)
            .filter(|m| seen.insert(m.as_str()))
            .filter(|m| self.could_be_secret(m.as_str()))
            .filter_map(|m| {
                let entropy = shannon_entropy(m.as_str());
                (entropy >= MIN_ENTROPY).then(|| HighEntropyFinding {
                    token: m.as_str().to_string(),
                    entropy,
                    context: context(body, m.start(), m.end()),
                })
            })
            .collect();
        findings.sort_by(|a, b| b.entropy.total_cmp(&a.entropy));
        findings.truncate(MAX_HIGH_ENTROPY);
        findings
    }

    fn could_be_secret(&self, token: &str) -> bool {
        if KNOWN_PREFIXES.iter().any(|p| token.starts_with(p))
            || token.chars().all(|c| c.is_ascii_hexdigit())
            || self.uuid.is_match(token)
        {
            return false;
        }
        let lower = token.to_ascii_lowercase();
        !FILE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
            && token.matches('/').count() < 2
            && token.matches('.').count() < 3
            && !BENIGN_PREFIXES.iter().any(|p| lower.starts_with(p))
            && !BENIGN_SUBSTRINGS.iter().any(|s| lower.contains(s))
            && mixes_character_classes(token)
    }
}

fn capped<'a>(matches: impl Iterator<Item = &'a str>) -> Vec<String> {
    matches
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_PER_CATEGORY)
        .map(str::to_string)
        .collect()
}

fn context(body: &str, start: usize, end: usize) -> String {
    let from = body[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map_or(0, |(idx, _)| idx);
    let to = body[end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map_or(body.len(), |(idx, _)| end + idx);
    body[from..to].replace('\n', " ")
}
