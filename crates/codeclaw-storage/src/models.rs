use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::digest::sha256_hex;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One tool invocation inside an assistant turn.
/// `input` is the raw payload exactly as the adapter received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    pub tool: String,
    #[serde(default)]
    pub input: String,
}

impl ToolUse {
    #[must_use]
    pub fn new(tool: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            input: input.into(),
        }
    }
}

/// A single turn of a recorded conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning trace, when the source recorded one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    #[must_use]
    pub fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            thinking: None,
            tool_uses: Vec::new(),
            timestamp: None,
        }
    }

    /// Builder-style helper for attaching a tool invocation
    #[must_use]
    pub fn with_tool_use(mut self, tool: impl Into<String>, input: impl Into<String>) -> Self {
        self.tool_uses.push(ToolUse::new(tool, input));
        self
    }

    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Message text, empty when the turn only carried tool uses
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Check that the message carries the fields a dataset record needs.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the message has no payload at all
    /// or a tool use is missing its name.
    pub fn validate(&self) -> Result<(), String> {
        let has_text = self.content.as_deref().is_some_and(|c| !c.trim().is_empty());
        let has_thinking = self.thinking.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_text && !has_thinking && self.tool_uses.is_empty() {
            return Err(format!("{} message has no content", self.role));
        }
        if let Some(idx) = self.tool_uses.iter().position(|t| t.tool.trim().is_empty()) {
            return Err(format!("tool use {idx} has no tool name"));
        }
        Ok(())
    }
}

/// Free-form counters reported by the source adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    #[serde(default)]
    pub user_messages: u64,
    #[serde(default)]
    pub assistant_messages: u64,
    #[serde(default)]
    pub tool_uses: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Canonical representation of one recorded conversation.
/// Produced by a source adapter and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub source: String,
    pub project: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Working directory of the session, used as the project root for path anonymization
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stats: SessionStats,
}

impl Session {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        source: impl Into<String>,
        project: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        let mut session = Self {
            session_id: session_id.into(),
            source: source.into(),
            project: project.into(),
            model: None,
            git_branch: None,
            cwd: None,
            start_time: None,
            end_time: None,
            messages,
            stats: SessionStats::default(),
        };
        session.recount();
        session
    }

    /// Recompute message and tool-use counters from the message list.
    /// Token counts are left alone since only the adapter knows them.
    pub fn recount(&mut self) {
        self.stats.user_messages = self.count_role(Role::User);
        self.stats.assistant_messages = self.count_role(Role::Assistant);
        self.stats.tool_uses = self.messages.iter().map(|m| m.tool_uses.len() as u64).sum();
    }

    fn count_role(&self, role: Role) -> u64 {
        self.messages.iter().filter(|m| m.role == role).count() as u64
    }

    /// Content digest used to detect sessions that changed since the last scan
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized
    pub fn digest(&self) -> serde_json::Result<String> {
        Ok(sha256_hex(&serde_json::to_vec(self)?))
    }
}

/// Which privacy pass produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingLayer {
    Path,
    Username,
    SecretPattern,
    Entropy,
    Email,
    Custom,
}

impl std::fmt::Display for FindingLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Path => "path",
            Self::Username => "username",
            Self::SecretPattern => "secret_pattern",
            Self::Entropy => "entropy",
            Self::Email => "email",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Text field of a message that a finding was located in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Content,
    Thinking,
    ToolInput(usize),
}

impl std::fmt::Display for TextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Thinking => write!(f, "thinking"),
            Self::ToolInput(idx) => write!(f, "tool_uses[{idx}].input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub message: usize,
    pub field: TextField,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "messages[{}].{}", self.message, self.field)
    }
}

/// One detected privacy hit.
/// The original span stays in memory for review and tests; it is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub layer: FindingLayer,
    /// Pattern name within the layer, e.g. `github_token`
    pub kind: String,
    pub location: Location,
    #[serde(skip)]
    pub original: String,
    pub replacement: String,
}

/// A message the redaction engine refused to carry forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub message_index: usize,
    pub reason: String,
}

/// Output of the redaction engine.
///
/// Only constructible through [`RedactedSession::new`], which keeps
/// `quarantined` consistent with `finding_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactedSession {
    session: Session,
    findings: Vec<Finding>,
    finding_count: usize,
    quarantined: bool,
    defects: Vec<Defect>,
}

impl RedactedSession {
    #[must_use]
    pub fn new(
        session: Session,
        findings: Vec<Finding>,
        defects: Vec<Defect>,
        quarantine_threshold: usize,
    ) -> Self {
        let finding_count = findings.len();
        Self {
            session,
            findings,
            finding_count,
            quarantined: finding_count > quarantine_threshold,
            defects,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    #[must_use]
    pub fn finding_count(&self) -> usize {
        self.finding_count
    }

    #[must_use]
    pub fn is_quarantined(&self) -> bool {
        self.quarantined
    }

    #[must_use]
    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    /// Human-readable quarantine reason, `None` when the session may be exported
    #[must_use]
    pub fn quarantine_reason(&self) -> Option<String> {
        if !self.quarantined {
            return None;
        }
        let mut layers: BTreeMap<FindingLayer, usize> = BTreeMap::new();
        for finding in &self.findings {
            *layers.entry(finding.layer).or_default() += 1;
        }
        let breakdown = layers
            .iter()
            .map(|(layer, count)| format!("{layer}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "{} findings exceed the quarantine threshold ({breakdown})",
            self.finding_count
        ))
    }
}

/// Training-value category of a session. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrajectoryLabel {
    #[serde(rename = "correction_loop")]
    CorrectionLoop,
    #[serde(rename = "debugging_trace")]
    DebuggingTrace,
    #[serde(rename = "iterative_build")]
    IterativeBuild,
    #[serde(rename = "refactor")]
    Refactor,
    /// Clean first try; published datasets know this label as `sft_clean`
    #[serde(rename = "sft_clean", alias = "clean_first_try")]
    CleanFirstTry,
}

impl TrajectoryLabel {
    pub const ALL: [Self; 5] = [
        Self::CorrectionLoop,
        Self::DebuggingTrace,
        Self::IterativeBuild,
        Self::Refactor,
        Self::CleanFirstTry,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CorrectionLoop => "correction_loop",
            Self::DebuggingTrace => "debugging_trace",
            Self::IterativeBuild => "iterative_build",
            Self::Refactor => "refactor",
            Self::CleanFirstTry => "sft_clean",
        }
    }
}

impl std::fmt::Display for TrajectoryLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrajectoryLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "correction_loop" => Ok(Self::CorrectionLoop),
            "debugging_trace" => Ok(Self::DebuggingTrace),
            "iterative_build" => Ok(Self::IterativeBuild),
            "refactor" => Ok(Self::Refactor),
            "sft_clean" | "clean_first_try" => Ok(Self::CleanFirstTry),
            _ => Err(format!("Unknown trajectory label: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub trajectory_type: TrajectoryLabel,
    pub redaction_count: usize,
}

/// One line of the export artifact. Downstream dataset consumers depend on this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub source: String,
    pub project: String,
    pub model: Option<String>,
    pub git_branch: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
    pub metadata: RecordMetadata,
    pub stats: SessionStats,
}

impl SessionRecord {
    /// Build a record from an already-redacted session. The working directory
    /// is intentionally not part of the record.
    #[must_use]
    pub fn from_session(session: Session, metadata: RecordMetadata) -> Self {
        Self {
            session_id: session.session_id,
            source: session.source,
            project: session.project,
            model: session.model,
            git_branch: session.git_branch,
            start_time: session.start_time,
            end_time: session.end_time,
            messages: session.messages,
            metadata,
            stats: session.stats,
        }
    }

    /// Serialize as a single JSONL line (without the trailing newline)
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Entry of the append-only quarantine store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub reason: String,
    pub finding_count: usize,
    pub quarantined_at: DateTime<Utc>,
}

/// Durable trail for sessions that never reached a snapshot for reasons other than quarantine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRecord {
    /// File path or session id the rejection applies to
    pub origin: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl RejectRecord {
    #[must_use]
    pub fn new(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Immutable, content-addressed batch of records - the reviewable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub records: Vec<SessionRecord>,
}

impl ExportSnapshot {
    /// Create a snapshot; the fingerprint covers the serialized records only,
    /// so identical content always yields the identical fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized
    pub fn new(records: Vec<SessionRecord>, created_at: DateTime<Utc>) -> serde_json::Result<Self> {
        let body = Self::render(&records)?;
        Ok(Self {
            fingerprint: sha256_hex(body.as_bytes()),
            created_at,
            records,
        })
    }

    fn render(records: &[SessionRecord]) -> serde_json::Result<String> {
        let mut body = String::new();
        for record in records {
            body.push_str(&record.to_line()?);
            body.push('\n');
        }
        Ok(body)
    }

    /// JSONL body of the snapshot, one record per line
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        Self::render(&self.records)
    }

    #[must_use]
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..self.fingerprint.len().min(12)]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn session_ids(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.session_id.clone()).collect()
    }

    #[must_use]
    pub fn label_breakdown(&self) -> BTreeMap<String, usize> {
        let mut breakdown = BTreeMap::new();
        for record in &self.records {
            *breakdown
                .entry(record.metadata.trajectory_type.to_string())
                .or_insert(0) += 1;
        }
        breakdown
    }

    #[must_use]
    pub fn total_redactions(&self) -> usize {
        self.records.iter().map(|r| r.metadata.redaction_count).sum()
    }
}

/// Sibling aggregate file written next to every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total_sessions: usize,
    pub trajectory_types: BTreeMap<String, usize>,
    pub total_redactions: usize,
    pub quarantined: usize,
    pub fingerprint: String,
    pub last_updated: DateTime<Utc>,
}

impl ExportSummary {
    #[must_use]
    pub fn for_snapshot(snapshot: &ExportSnapshot, quarantined: usize) -> Self {
        Self {
            total_sessions: snapshot.len(),
            trajectory_types: snapshot.label_breakdown(),
            total_redactions: snapshot.total_redactions(),
            quarantined,
            fingerprint: snapshot.fingerprint.clone(),
            last_updated: snapshot.created_at,
        }
    }
}

/// Publish gate stage. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Unconfigured,
    Configured,
    Exported,
    Confirmed,
    Published,
}

impl Stage {
    #[must_use]
    pub const fn number(&self) -> u8 {
        match self {
            Self::Unconfigured => 0,
            Self::Configured => 1,
            Self::Exported => 2,
            Self::Confirmed => 3,
            Self::Published => 4,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Exported => "exported",
            Self::Confirmed => "confirmed",
            Self::Published => "published",
        };
        f.write_str(name)
    }
}

/// Reviewer statements captured at confirm time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAttestations {
    pub asked_full_name: String,
    pub asked_sensitive_entities: String,
    pub manual_scan_done: String,
    pub manual_scan_sessions: Option<u32>,
    /// Advisory PII and high-entropy hits found by the confirm-time rescan
    #[serde(default)]
    pub pii_findings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanExample {
    pub line: usize,
    pub excerpt: String,
}

/// Result of scanning one snapshot for the reviewer's full name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullNameScan {
    /// Fingerprint of the snapshot the scan ran against
    pub fingerprint: String,
    pub query: Option<String>,
    pub skipped: bool,
    pub match_count: usize,
    pub examples: Vec<ScanExample>,
}

impl FullNameScan {
    #[must_use]
    pub fn skipped(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            query: None,
            skipped: true,
            match_count: 0,
            examples: Vec::new(),
        }
    }
}

/// How a push was authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    /// Reviewer-confirmed publication
    Manual,
    /// Daemon accumulation into a private destination
    Automatic,
}

impl std::fmt::Display for PushKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
        }
    }
}

/// Publish gate state. Persisted as one document; see `StateStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub stage: Stage,
    pub current_fingerprint: Option<String>,
    pub confirmed_fingerprint: Option<String>,
    /// A confirmation voided by a later export. Publishing without naming
    /// a fresh confirmation reports it as stale.
    #[serde(default)]
    pub superseded_confirmation: Option<String>,
    /// Source systems in play, e.g. `claude`
    #[serde(default)]
    pub source_scope: BTreeSet<String>,
    // Append-only sets: merged, never replaced
    #[serde(default)]
    pub excluded_projects: BTreeSet<String>,
    #[serde(default)]
    pub redact_strings: BTreeSet<String>,
    #[serde(default)]
    pub redact_usernames: BTreeSet<String>,
    /// Projects opted into export. Empty means every project in scope.
    #[serde(default)]
    pub connected_projects: BTreeSet<String>,
    pub review: Option<ReviewAttestations>,
    pub full_name_scan: Option<FullNameScan>,
    pub publish_attestation: Option<String>,
    pub last_published_fingerprint: Option<String>,
    #[serde(default)]
    pub total_publishes: u64,
    #[serde(default)]
    pub total_automatic_pushes: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Push history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecord {
    pub fingerprint: String,
    pub kind: PushKind,
    pub destination: String,
    pub sessions: usize,
    pub pushed_at: DateTime<Utc>,
}

/// Retry bookkeeping for one publish destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Consecutive failed attempts since the last success
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set after a fatal failure; automatic retries stop until a manual sync
    pub halted: bool,
    pub last_error: Option<String>,
}

impl RetryState {
    /// A backoff deadline is set and has not passed yet
    #[must_use]
    pub fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        !self.halted && self.next_attempt_at.is_some_and(|at| at > now)
    }
}

/// Daemon state. The pending queue is the single source of truth for
/// sessions that have not been pushed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub running: bool,
    pub paused: bool,
    #[serde(default)]
    pub pending: Vec<SessionRecord>,
    /// session id -> content digest of the last processed version
    #[serde(default)]
    pub seen: BTreeMap<String, String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// destination name -> retry bookkeeping
    #[serde(default)]
    pub retries: BTreeMap<String, RetryState>,
    /// Fingerprint of the pending batch already recorded as an export
    #[serde(default)]
    pub recorded_batch: Option<String>,
    /// Sessions quarantined since the last successful push
    #[serde(default)]
    pub batch_quarantined: usize,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DaemonState {
    /// Queue a record, replacing an older pending copy of the same session
    pub fn enqueue(&mut self, record: SessionRecord) {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|r| r.session_id == record.session_id)
        {
            *existing = record;
        } else {
            self.pending.push(record);
        }
    }

    /// Remove records that were part of a successful push, returns how many were removed
    pub fn remove_pushed(&mut self, pushed: &[SessionRecord]) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| !pushed.contains(r));
        before - self.pending.len()
    }

    /// Forget sessions whose source files are gone. Returns how many
    /// entries were dropped.
    pub fn prune_seen(&mut self, live: &BTreeSet<String>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|id, _| live.contains(id));
        before - self.seen.len()
    }

    #[must_use]
    pub fn retry_for(&self, destination: &str) -> RetryState {
        self.retries.get(destination).cloned().unwrap_or_default()
    }
}

/// Tunables for the pipeline and daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub push_threshold: usize,
    pub backoff_tiers_secs: Vec<u64>,
    pub quarantine_threshold: usize,
    pub watch_interval_secs: u64,
    pub debounce_millis: u64,
    pub max_tool_input_chars: usize,
    pub worker_count: usize,
    pub auto_push: bool,
    /// Seal exported artifacts with the local key
    pub encrypt_artifacts: bool,
}

impl Settings {
    #[must_use]
    pub fn default_settings() -> Self {
        Self {
            push_threshold: 5,
            backoff_tiers_secs: vec![30, 120, 300], // short, medium, long
            quarantine_threshold: 3,
            watch_interval_secs: 60,
            debounce_millis: 1500,
            max_tool_input_chars: 300,
            worker_count: 4,
            auto_push: false,
            encrypt_artifacts: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

/// Upload credentials for the dataset host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// `https://...` for a dataset host or `file:///path` for a local checkout
    pub endpoint: String,
    pub repo: String,
    pub api_key: String,
    pub updated_at: DateTime<Utc>,
}

impl PublisherConfig {
    #[must_use]
    pub fn new(endpoint: String, repo: String, api_key: String) -> Self {
        Self {
            endpoint,
            repo,
            api_key,
            updated_at: Utc::now(),
        }
    }

    /// Credentials are usable when every field is present. Local
    /// directory destinations need no API key.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let has_key = !self.api_key.trim().is_empty() || self.endpoint.starts_with("file://");
        !self.endpoint.trim().is_empty() && !self.repo.trim().is_empty() && has_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, label: TrajectoryLabel) -> SessionRecord {
        let session = Session::new(id, "claude", "demo", vec![Message::user("hello")]);
        SessionRecord::from_session(
            session,
            RecordMetadata {
                trajectory_type: label,
                redaction_count: 1,
            },
        )
    }

    #[test]
    fn test_message_validate() {
        assert!(Message::user("hi").validate().is_ok());
        assert!(Message::new(Role::Assistant, None)
            .with_tool_use("bash", "ls")
            .validate()
            .is_ok());
        assert!(Message::new(Role::User, Some("   ".to_string()))
            .validate()
            .is_err());
        assert!(Message::assistant("x")
            .with_tool_use("", "ls")
            .validate()
            .is_err());
    }

    #[test]
    fn test_session_new_counts_stats() {
        let session = Session::new(
            "s1",
            "claude",
            "demo",
            vec![
                Message::user("do it"),
                Message::assistant("ok").with_tool_use("bash", "ls"),
            ],
        );
        assert_eq!(session.stats.user_messages, 1);
        assert_eq!(session.stats.assistant_messages, 1);
        assert_eq!(session.stats.tool_uses, 1);
    }

    #[test]
    fn test_redacted_session_quarantine_invariant() {
        let session = Session::new("s1", "claude", "demo", vec![Message::user("hi")]);
        let finding = Finding {
            layer: FindingLayer::Custom,
            kind: "custom".to_string(),
            location: Location {
                message: 0,
                field: TextField::Content,
            },
            original: "acme".to_string(),
            replacement: "[REDACTED]".to_string(),
        };

        let three = RedactedSession::new(session.clone(), vec![finding.clone(); 3], Vec::new(), 3);
        assert_eq!(three.finding_count(), 3);
        assert!(!three.is_quarantined());
        assert!(three.quarantine_reason().is_none());

        let four = RedactedSession::new(session, vec![finding; 4], Vec::new(), 3);
        assert!(four.is_quarantined());
        assert!(four.quarantine_reason().unwrap().contains("custom=4"));
    }

    #[test]
    fn test_finding_original_not_serialized() {
        let finding = Finding {
            layer: FindingLayer::SecretPattern,
            kind: "github_token".to_string(),
            location: Location {
                message: 2,
                field: TextField::ToolInput(1),
            },
            original: "ghp_secretsecret".to_string(),
            replacement: "[REDACTED]".to_string(),
        };
        let json = serde_json::to_string(&finding).unwrap();
        assert!(!json.contains("ghp_secretsecret"));
        assert_eq!(finding.location.to_string(), "messages[2].tool_uses[1].input");
    }

    #[test]
    fn test_trajectory_label_serde_names() {
        let json = serde_json::to_string(&TrajectoryLabel::CleanFirstTry).unwrap();
        assert_eq!(json, "\"sft_clean\"");
        let parsed: TrajectoryLabel = serde_json::from_str("\"clean_first_try\"").unwrap();
        assert_eq!(parsed, TrajectoryLabel::CleanFirstTry);
        assert_eq!(
            "correction-loop".parse::<TrajectoryLabel>().unwrap(),
            TrajectoryLabel::CorrectionLoop
        );
    }

    #[test]
    fn test_snapshot_fingerprint_is_content_addressed() {
        let a = ExportSnapshot::new(
            vec![record("s1", TrajectoryLabel::Refactor)],
            Utc::now(),
        )
        .unwrap();
        let b = ExportSnapshot::new(
            vec![record("s1", TrajectoryLabel::Refactor)],
            Utc::now() + chrono::Duration::hours(1),
        )
        .unwrap();
        let c = ExportSnapshot::new(
            vec![record("s2", TrajectoryLabel::Refactor)],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
        assert_eq!(a.short_fingerprint().len(), 12);
    }

    #[test]
    fn test_snapshot_label_breakdown() {
        let snapshot = ExportSnapshot::new(
            vec![
                record("s1", TrajectoryLabel::Refactor),
                record("s2", TrajectoryLabel::Refactor),
                record("s3", TrajectoryLabel::CorrectionLoop),
            ],
            Utc::now(),
        )
        .unwrap();
        let breakdown = snapshot.label_breakdown();
        assert_eq!(breakdown.get("refactor"), Some(&2));
        assert_eq!(breakdown.get("correction_loop"), Some(&1));
        assert_eq!(snapshot.total_redactions(), 3);
    }

    #[test]
    fn test_daemon_state_enqueue_replaces_same_session() {
        let mut state = DaemonState::default();
        state.enqueue(record("s1", TrajectoryLabel::Refactor));
        state.enqueue(record("s2", TrajectoryLabel::Refactor));
        state.enqueue(record("s1", TrajectoryLabel::CorrectionLoop));

        assert_eq!(state.pending.len(), 2);
        assert_eq!(
            state.pending[0].metadata.trajectory_type,
            TrajectoryLabel::CorrectionLoop
        );

        let pushed = vec![state.pending[1].clone()];
        assert_eq!(state.remove_pushed(&pushed), 1);
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_prune_seen_keeps_live_sessions() {
        let mut state = DaemonState::default();
        state.seen.insert("s1".to_string(), "d1".to_string());
        state.seen.insert("gone".to_string(), "d2".to_string());

        let live: BTreeSet<String> = ["s1".to_string()].into_iter().collect();
        assert_eq!(state.prune_seen(&live), 1);
        assert!(state.seen.contains_key("s1"));
        assert!(!state.seen.contains_key("gone"));
    }

    #[test]
    fn test_retry_waits_only_until_deadline() {
        let now = Utc::now();
        let mut retry = RetryState {
            attempts: 1,
            next_attempt_at: Some(now + chrono::Duration::seconds(30)),
            ..RetryState::default()
        };
        assert!(retry.is_waiting(now));
        assert!(!retry.is_waiting(now + chrono::Duration::seconds(31)));

        retry.halted = true;
        assert!(!retry.is_waiting(now));
        assert!(!RetryState::default().is_waiting(now));
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Unconfigured < Stage::Configured);
        assert!(Stage::Exported < Stage::Confirmed);
        assert!(Stage::Confirmed < Stage::Published);
        assert_eq!(Stage::Published.number(), 4);
    }

    #[test]
    fn test_publisher_config_completeness() {
        let http = PublisherConfig::new(
            "https://datasets.example.test".to_string(),
            "me/sessions".to_string(),
            String::new(),
        );
        assert!(!http.is_complete());

        let local = PublisherConfig::new(
            "file:///tmp/dataset".to_string(),
            "me/sessions".to_string(),
            String::new(),
        );
        assert!(local.is_complete());
    }
}
