//! Source adapters: turn tool-specific conversation logs into [`Session`]s.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use codeclaw_storage::{Message, Role, Session, ToolUse};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::get_data_dir;

pub const CLAUDE_SOURCE: &str = "claude";
pub const CANONICAL_SOURCE: &str = "canonical";

/// A session file that could not be turned into a session
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed session file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl SourceError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Malformed { path, .. } => path,
        }
    }
}

/// One coding tool's on-disk conversation format
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Directories holding this tool's session files
    fn roots(&self) -> Vec<PathBuf>;

    /// Whether a file under one of the roots is a session file
    fn accepts(&self, path: &Path) -> bool;

    /// Parse one session file. `Ok(None)` means the file held no messages.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Malformed`] when the file cannot be interpreted
    fn parse(&self, path: &Path, raw: &str) -> Result<Option<Session>, SourceError>;

    /// Every session file currently under the roots, sorted
    fn discover(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .roots()
            .iter()
            .filter(|root| root.is_dir())
            .flat_map(|root| WalkDir::new(root).follow_links(false).into_iter())
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| self.accepts(path))
            .collect();
        files.sort();
        files
    }

    /// Read and parse a single file
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] when the file cannot be read, or whatever
    /// [`SourceAdapter::parse`] reports
    fn load(&self, path: &Path) -> Result<Option<Session>, SourceError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(path, &raw)
    }
}

/// Read every session file of the given adapters. Blocking. Files that
/// fail to parse come back as errors; the rest of the scan goes on.
#[must_use]
pub fn load_sessions(adapters: &[Arc<dyn SourceAdapter>]) -> (Vec<Session>, Vec<SourceError>) {
    let mut sessions = Vec::new();
    let mut errors = Vec::new();
    for adapter in adapters {
        for path in adapter.discover() {
            match adapter.load(&path) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
    }
    (sessions, errors)
}

/// Adapters for the configured source scope. Unknown names are skipped.
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined
pub fn adapters_for_scope(scope: &BTreeSet<String>) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
    for name in scope {
        match name.as_str() {
            CLAUDE_SOURCE => match ClaudeAdapter::from_home() {
                Some(adapter) => adapters.push(Box::new(adapter)),
                None => log::warn!("No home directory; skipping the claude source"),
            },
            CANONICAL_SOURCE => {
                adapters.push(Box::new(CanonicalAdapter::new(get_data_dir()?.join("imports"))));
            }
            other => log::warn!("Unknown source '{other}' in scope, skipping"),
        }
    }
    Ok(adapters)
}

/// Every adapter this build knows about
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined
pub fn all_adapters() -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let scope: BTreeSet<String> = [CLAUDE_SOURCE, CANONICAL_SOURCE]
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(adapters_for_scope(&scope)?
        .into_iter()
        .map(Arc::from)
        .collect())
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Project name from the hyphen-encoded directory the assistant stores
/// sessions under, e.g. `-Users-alice-Documents-myapp` is `myapp`.
#[must_use]
pub fn decode_project_dir(dir_name: &str) -> String {
    if dir_name.is_empty() {
        return String::new();
    }
    let segments: Vec<&str> = dir_name
        .trim_matches('-')
        .split('-')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return "unknown".to_string();
    }

    // Windows drive letter
    let start = usize::from(segments[0].ends_with(':'));
    let join_from = |idx: usize| -> String {
        if idx >= segments.len() {
            "unknown".to_string()
        } else {
            segments[idx..].join("-")
        }
    };

    let Some(first) = segments.get(start) else {
        return "unknown".to_string();
    };
    let is_users = first.eq_ignore_ascii_case("users");
    if !is_users && !first.eq_ignore_ascii_case("home") {
        return join_from(start);
    }

    // Skip the account name
    let mut project = start + 2;
    if is_users
        && segments
            .get(project)
            .is_some_and(|s| ["Documents", "Downloads", "Desktop"].contains(s))
    {
        project += 1;
        if segments.len() == project {
            return format!("~{}", segments[project - 1]);
        }
    }
    if segments.len() <= project {
        return "~home".to_string();
    }
    join_from(project)
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    content: Value,
    model: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<ClaudeMessage>,
    timestamp: Option<Value>,
    cwd: Option<String>,
    #[serde(rename = "gitBranch")]
    git_branch: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Conversation logs written by Claude Code: one JSONL file per session under
/// `~/.claude/projects/<encoded project dir>/`
#[derive(Debug, Clone)]
pub struct ClaudeAdapter {
    root: PathBuf,
}

impl ClaudeAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn from_home() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".claude").join("projects")))
    }

    fn user_text(content: &Value) -> Option<String> {
        let text = match content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        };
        (!text.trim().is_empty()).then_some(text)
    }

    fn tool_input(input: Option<&Value>) -> String {
        match input {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn assistant_message(content: &Value) -> Option<Message> {
        let Value::Array(blocks) = content else {
            return None;
        };

        let mut text = Vec::new();
        let mut thinking = Vec::new();
        let mut tool_uses = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str).map(str::trim) {
                        if !t.is_empty() {
                            text.push(t.to_string());
                        }
                    }
                }
                Some("thinking") => {
                    if let Some(t) = block.get("thinking").and_then(Value::as_str).map(str::trim) {
                        if !t.is_empty() {
                            thinking.push(t.to_string());
                        }
                    }
                }
                Some("tool_use") => tool_uses.push(ToolUse::new(
                    block.get("name").and_then(Value::as_str).unwrap_or_default(),
                    Self::tool_input(block.get("input")),
                )),
                _ => {}
            }
        }
        if text.is_empty() && thinking.is_empty() && tool_uses.is_empty() {
            return None;
        }

        let mut message = Message::new(
            Role::Assistant,
            (!text.is_empty()).then(|| text.join("\n\n")),
        );
        message.thinking = (!thinking.is_empty()).then(|| thinking.join("\n\n"));
        message.tool_uses = tool_uses;
        Some(message)
    }
}

impl SourceAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        CLAUDE_SOURCE
    }

    fn roots(&self) -> Vec<PathBuf> {
        vec![self.root.clone()]
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "jsonl")
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Option<Session>, SourceError> {
        let file_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| SourceError::Malformed {
                path: path.to_path_buf(),
                reason: "no file name".to_string(),
            })?;
        let project = path
            .parent()
            .and_then(Path::file_name)
            .map(|d| decode_project_dir(&d.to_string_lossy()))
            .unwrap_or_default();

        let mut session = Session::new(file_id, CLAUDE_SOURCE, project, Vec::new());
        let mut skipped = 0usize;
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(entry) = serde_json::from_str::<ClaudeEntry>(line) else {
                skipped += 1;
                continue;
            };

            if session.cwd.is_none() {
                if let Some(cwd) = entry.cwd.filter(|c| !c.is_empty()) {
                    session.cwd = Some(cwd);
                    session.git_branch = entry.git_branch;
                    if let Some(id) = entry.session_id {
                        session.session_id = id;
                    }
                }
            }

            let timestamp = parse_timestamp(entry.timestamp.as_ref());
            let Some(body) = entry.message else {
                continue;
            };
            let message = match entry.kind.as_deref() {
                Some("user") => Self::user_text(&body.content).map(Message::user),
                Some("assistant") => {
                    let message = Self::assistant_message(&body.content);
                    if message.is_some() {
                        if session.model.is_none() {
                            session.model = body.model;
                        }
                        if let Some(usage) = body.usage {
                            input_tokens += usage.input_tokens + usage.cache_read_input_tokens;
                            output_tokens += usage.output_tokens;
                        }
                    }
                    message
                }
                _ => None,
            };

            if let Some(mut message) = message {
                message.timestamp = timestamp;
                if timestamp.is_some() {
                    session.start_time = session.start_time.or(timestamp);
                    session.end_time = timestamp;
                }
                session.messages.push(message);
            }
        }

        if skipped > 0 {
            log::debug!("Skipped {skipped} unreadable lines in {}", path.display());
        }
        if session.messages.is_empty() {
            return Ok(None);
        }
        session.recount();
        session.stats.input_tokens = input_tokens;
        session.stats.output_tokens = output_tokens;
        Ok(Some(session))
    }
}

/// Files that already hold one canonical session as JSON, for tools that
/// export their own logs
#[derive(Debug, Clone)]
pub struct CanonicalAdapter {
    root: PathBuf,
}

impl CanonicalAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceAdapter for CanonicalAdapter {
    fn name(&self) -> &str {
        CANONICAL_SOURCE
    }

    fn roots(&self) -> Vec<PathBuf> {
        vec![self.root.clone()]
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "json")
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Option<Session>, SourceError> {
        let mut session: Session =
            serde_json::from_str(raw).map_err(|e| SourceError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if session.session_id.trim().is_empty() {
            return Err(SourceError::Malformed {
                path: path.to_path_buf(),
                reason: "missing session_id".to_string(),
            });
        }
        if session.messages.is_empty() {
            return Ok(None);
        }
        session.recount();
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAUDE_LOG: &str = r#"{"type":"summary","summary":"Fix tests"}
{"type":"user","cwd":"/home/alice/work/app","gitBranch":"main","sessionId":"abc-123","timestamp":"2026-03-01T10:00:00Z","message":{"role":"user","content":"Run the tests"}}
{"type":"assistant","timestamp":"2026-03-01T10:00:05Z","message":{"model":"claude-sonnet","usage":{"input_tokens":10,"cache_read_input_tokens":5,"output_tokens":7},"content":[{"type":"thinking","thinking":"Need to run cargo"},{"type":"text","text":"Running them."},{"type":"tool_use","name":"Bash","input":{"command":"cargo test"}}]}}
not json at all
{"type":"user","timestamp":1772359210000,"message":{"role":"user","content":[{"type":"tool_result","content":"ok"}]}}
{"type":"user","timestamp":1772359220000,"message":{"role":"user","content":[{"type":"text","text":"Thanks"}]}}
"#;

    #[test]
    fn test_decode_project_dir() {
        assert_eq!(decode_project_dir("-Users-alice-Documents-myapp"), "myapp");
        assert_eq!(decode_project_dir("-home-bob-project"), "project");
        assert_eq!(decode_project_dir("-home-bob-my-project"), "my-project");
        assert_eq!(decode_project_dir("standalone"), "standalone");
        assert_eq!(decode_project_dir("-Users-alice"), "~home");
        assert_eq!(decode_project_dir("-Users-alice-Desktop"), "~Desktop");
        assert_eq!(decode_project_dir("C:-Users-alice-code"), "code");
        assert_eq!(decode_project_dir("---"), "unknown");
        assert_eq!(decode_project_dir(""), "");
    }

    #[test]
    fn test_parse_claude_log() {
        let adapter = ClaudeAdapter::new("/tmp/projects");
        let path = Path::new("/tmp/projects/-home-alice-work-app/file-id.jsonl");

        let session = adapter.parse(path, CLAUDE_LOG).unwrap().unwrap();

        assert_eq!(session.session_id, "abc-123");
        assert_eq!(session.project, "work-app");
        assert_eq!(session.cwd.as_deref(), Some("/home/alice/work/app"));
        assert_eq!(session.git_branch.as_deref(), Some("main"));
        assert_eq!(session.model.as_deref(), Some("claude-sonnet"));
        // tool_result-only user turn is dropped
        assert_eq!(session.messages.len(), 3);

        let assistant = &session.messages[1];
        assert_eq!(assistant.text(), "Running them.");
        assert_eq!(assistant.thinking.as_deref(), Some("Need to run cargo"));
        assert_eq!(assistant.tool_uses[0].tool, "Bash");
        assert_eq!(assistant.tool_uses[0].input, r#"{"command":"cargo test"}"#);

        assert_eq!(session.stats.input_tokens, 15);
        assert_eq!(session.stats.output_tokens, 7);
        assert_eq!(session.stats.tool_uses, 1);
        assert_eq!(session.messages[2].text(), "Thanks");
        assert!(session.end_time > session.start_time);
    }

    #[test]
    fn test_string_tool_input_is_kept_verbatim() {
        let log = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":"ls -la"}]}}"#;
        let session = ClaudeAdapter::new("/r")
            .parse(Path::new("/r/p/s.jsonl"), log)
            .unwrap()
            .unwrap();
        assert_eq!(session.messages[0].tool_uses[0].input, "ls -la");
    }

    #[test]
    fn test_empty_log_yields_nothing() {
        let adapter = ClaudeAdapter::new("/r");
        let parsed = adapter
            .parse(Path::new("/r/p/s.jsonl"), "{\"type\":\"summary\"}\n")
            .unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_discover_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-home-alice-app");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("b.jsonl"), "").unwrap();
        std::fs::write(project.join("a.jsonl"), "").unwrap();
        std::fs::write(project.join("notes.txt"), "").unwrap();

        let found = ClaudeAdapter::new(dir.path()).discover();

        assert_eq!(found, vec![project.join("a.jsonl"), project.join("b.jsonl")]);
    }

    #[test]
    fn test_canonical_adapter() {
        let session = Session::new("s1", "aider", "demo", vec![Message::user("hi")]);
        let raw = serde_json::to_string(&session).unwrap();
        let adapter = CanonicalAdapter::new("/imports");

        let parsed = adapter.parse(Path::new("/imports/s1.json"), &raw).unwrap();
        assert_eq!(parsed, Some(session));

        assert!(matches!(
            adapter.parse(Path::new("/imports/bad.json"), "{"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_scope_selects_adapters() {
        let scope: BTreeSet<String> = ["canonical".to_string(), "codex".to_string()]
            .into_iter()
            .collect();
        let adapters = adapters_for_scope(&scope).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), CANONICAL_SOURCE);
    }
}
