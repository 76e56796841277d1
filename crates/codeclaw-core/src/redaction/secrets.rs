use anyhow::Result;
use codeclaw_storage::FindingLayer;
use regex::{Regex, RegexSet};

use super::{splice, Hit, Span, TextPass, REDACTED};

/// Named secret shapes, most specific first. Earlier entries win when two
/// alternatives match at the same position.
const PATTERNS: &[(&str, &str)] = &[
    (
        "jwt",
        r"eyJ[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{10,}",
    ),
    // Header only or a truncated payload
    ("jwt_partial", r"eyJ[A-Za-z0-9_-]{15,}"),
    (
        "db_url",
        r#"(?:postgres(?:ql)?|mysql|mongodb(?:\+srv)?|redis)://[^:\s/]+:[^@\s]+@[^\s"'`]+"#,
    ),
    ("anthropic_key", r"\bsk-ant-[A-Za-z0-9_-]{20,}"),
    ("openai_key", r"\bsk-(?:proj-)?[A-Za-z0-9_-]{16,}"),
    ("hf_token", r"\bhf_[A-Za-z0-9]{20,}"),
    (
        "github_token",
        r"\b(?:gh[pousr]_[A-Za-z0-9]{30,}|github_pat_[A-Za-z0-9_]{22,})",
    ),
    ("pypi_token", r"\bpypi-[A-Za-z0-9_-]{50,}"),
    ("npm_token", r"\bnpm_[A-Za-z0-9]{30,}"),
    ("aws_key", r"\bAKIA[0-9A-Z]{16}\b"),
    (
        "aws_secret",
        r#"(?i:aws_secret_access_key|secret_key)\s*[=:]\s*['"]?[A-Za-z0-9/+=]{40}['"]?"#,
    ),
    ("slack_token", r"\bxox[bpsa]-[A-Za-z0-9-]{20,}"),
    (
        "discord_webhook",
        r"https?://(?:discord\.com|discordapp\.com)/api/webhooks/[0-9]+/[A-Za-z0-9_-]{20,}",
    ),
    (
        "private_key",
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----(?s:.*?)-----END (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
    ),
    (
        "cli_token_flag",
        r"(?i:--?(?:access[_-]?token|auth[_-]?token|api[_-]?key|secret|password|token))[\s=]+[A-Za-z0-9_/+=.-]{8,}",
    ),
    (
        "env_secret",
        r#"(?i:SECRET|PASSWORD|TOKEN|API_KEY|AUTH_KEY|ACCESS_KEY|SERVICE_KEY|DB_PASSWORD|SUPABASE_KEY|SUPABASE_SERVICE|ANON_KEY|SERVICE_ROLE)\s*=\s*(?:'[^'\n]{6,}'|"[^"\n]{6,}"|[^\s'"()]{6,})"#,
    ),
    (
        "generic_secret",
        r#"(?i:secret[_-]?key|api[_-]?key|api[_-]?secret|access[_-]?token|auth[_-]?token|service[_-]?role[_-]?key|private[_-]?key)\s*[=:]\s*['"][A-Za-z0-9_/+=.-]{20,}['"]"#,
    ),
    (
        "bearer",
        r"Bearer\s+eyJ[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{20,}",
    ),
    (
        "ip_address",
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\b",
    ),
    (
        "url_token",
        r"[?&](?i:key|token|secret|password|apikey|api_key|access_token|auth)=[A-Za-z0-9_/+=.-]{8,}",
    ),
];

/// Documentation placeholders and addresses that carry no secret
const ALLOWLIST: &[&str] = &[
    r"://user:pass@",
    r"://username:password@",
    r"^192\.168\.",
    r"^10\.[0-9]+\.[0-9]+\.[0-9]+$",
    r"^172\.(?:1[6-9]|2[0-9]|3[01])\.",
    r"^127\.",
    r"^0\.0\.0\.0$",
    r"^255\.255\.",
    r"^8\.8\.8\.8$",
    r"^8\.8\.4\.4$",
    r"^1\.1\.1\.1$",
];

/// An `env_secret` match assigns a literal rather than code. Quoted values
/// always count. Unquoted ones do not when they are a call, a `$VAR`
/// reference or a bare identifier path such as `self.token`.
fn is_literal_assignment(matched: &str, next: Option<char>) -> bool {
    let Some((_, value)) = matched.split_once('=') else {
        return false;
    };
    let value = value.trim_start();
    if value.starts_with(['\'', '"']) {
        return true;
    }
    if next == Some('(') || value.starts_with('$') {
        return false;
    }
    !value
        .chars()
        .all(|c| c.is_ascii_alphabetic() || c == '_' || c == '.')
}

/// Known credential shapes, compiled into one alternation so each text
/// field is scanned once
pub struct SecretScanner {
    pattern: Regex,
    allowlist: RegexSet,
}

impl SecretScanner {
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile
    pub fn new() -> Result<Self> {
        let alternation = PATTERNS
            .iter()
            .map(|(name, pattern)| format!("(?P<{name}>{pattern})"))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            pattern: Regex::new(&alternation)?,
            allowlist: RegexSet::new(ALLOWLIST)?,
        })
    }

    /// Names of every pattern the scanner knows
    pub fn pattern_names() -> impl Iterator<Item = &'static str> {
        PATTERNS.iter().map(|(name, _)| *name)
    }
}

impl TextPass for SecretScanner {
    fn layer(&self) -> FindingLayer {
        FindingLayer::SecretPattern
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let mut spans = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if self.allowlist.is_match(whole.as_str()) {
                continue;
            }
            let kind = PATTERNS
                .iter()
                .map(|(name, _)| *name)
                .find(|name| caps.name(name).is_some())
                .unwrap_or("secret");
            if kind == "env_secret"
                && !is_literal_assignment(whole.as_str(), text[whole.end()..].chars().next())
            {
                continue;
            }
            spans.push(Span {
                start: whole.start(),
                end: whole.end(),
                kind: kind.to_string(),
                replacement: REDACTED.to_string(),
            });
        }
        splice(text, spans)
    }
}
