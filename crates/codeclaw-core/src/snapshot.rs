//! Export snapshotter: turns processed sessions into the reviewable artifact.

use anyhow::{bail, Result};
use chrono::Utc;
use codeclaw_storage::{
    ArtifactStore, ExportSnapshot, FullNameScan, GateState, QuarantineRecord, RecordMetadata,
    RejectRecord, ScanExample, SessionRecord,
};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::pipeline::ProcessedSession;

/// Excerpts returned by a full-name scan
const MAX_SCAN_EXAMPLES: usize = 5;
const MAX_EXCERPT_CHARS: usize = 220;

/// What one export run produced
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub snapshot: ExportSnapshot,
    pub path: PathBuf,
    pub quarantined: usize,
    pub excluded: usize,
}

/// Which projects may reach an export. An empty connected set admits every
/// project that is not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    pub excluded: BTreeSet<String>,
    pub connected: BTreeSet<String>,
}

fn contains_project(projects: &BTreeSet<String>, project: &str) -> bool {
    projects
        .iter()
        .any(|p| p.trim().eq_ignore_ascii_case(project.trim()))
}

impl ProjectFilter {
    #[must_use]
    pub fn from_state(state: &GateState) -> Self {
        Self {
            excluded: state.excluded_projects.clone(),
            connected: state.connected_projects.clone(),
        }
    }

    /// Every project is admitted
    #[must_use]
    pub fn all_projects() -> Self {
        Self::default()
    }

    /// Why `project` is kept out of the export, if it is
    #[must_use]
    pub fn rejection(&self, project: &str) -> Option<&'static str> {
        if contains_project(&self.excluded, project) {
            Some("project is excluded from export")
        } else if !self.connected.is_empty() && !contains_project(&self.connected, project) {
            Some("project is not connected for export")
        } else {
            None
        }
    }
}

/// Records that survived quarantine and project selection
#[derive(Debug, Clone, Default)]
pub struct Admitted {
    pub records: Vec<SessionRecord>,
    pub quarantined: usize,
    pub excluded: usize,
}

pub struct ExportSnapshotter {
    artifacts: ArtifactStore,
    max_tool_input_chars: usize,
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((byte_idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_idx);
    }
}

impl ExportSnapshotter {
    #[must_use]
    pub fn new(artifacts: ArtifactStore, max_tool_input_chars: usize) -> Self {
        Self {
            artifacts,
            max_tool_input_chars,
        }
    }

    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Dataset record for a processed session. Tool inputs are cut to size
    /// here, on content that is already redacted.
    #[must_use]
    pub fn build_record(&self, processed: &ProcessedSession) -> SessionRecord {
        let mut record = SessionRecord::from_session(
            processed.redacted.session().clone(),
            RecordMetadata {
                trajectory_type: processed.label,
                redaction_count: processed.redacted.finding_count(),
            },
        );
        for message in &mut record.messages {
            for tool_use in &mut message.tool_uses {
                truncate_chars(&mut tool_use.input, self.max_tool_input_chars);
            }
        }
        record
    }

    /// Route quarantined sessions and filtered-out projects to their durable
    /// stores and return the records that may be exported.
    ///
    /// # Errors
    ///
    /// Returns an error if the quarantine store or rejects log cannot be written
    pub fn admit(&self, processed: Vec<ProcessedSession>, filter: &ProjectFilter) -> Result<Admitted> {
        let mut admitted = Admitted::default();

        for item in processed {
            let session_id = item.session_id().to_string();
            for defect in item.redacted.defects() {
                self.artifacts.append_reject(&RejectRecord::new(
                    format!("{session_id}#messages[{}]", defect.message_index),
                    defect.reason.clone(),
                ))?;
            }

            if let Some(reason) = filter.rejection(&item.redacted.session().project) {
                self.artifacts
                    .append_reject(&RejectRecord::new(session_id.clone(), reason))?;
                log::info!("Excluded session {session_id} ({reason})");
                admitted.excluded += 1;
                continue;
            }

            let record = self.build_record(&item);
            if let Some(reason) = item.redacted.quarantine_reason() {
                self.artifacts.append_quarantine(&QuarantineRecord {
                    record,
                    reason,
                    finding_count: item.redacted.finding_count(),
                    quarantined_at: Utc::now(),
                })?;
                log::warn!(
                    "Quarantined session {session_id} ({} findings)",
                    item.redacted.finding_count()
                );
                admitted.quarantined += 1;
                continue;
            }

            admitted.records.push(record);
        }
        Ok(admitted)
    }

    /// Build and persist a new snapshot from processed sessions
    ///
    /// # Errors
    ///
    /// Returns an error if any artifact cannot be written
    pub fn snapshot(
        &self,
        processed: Vec<ProcessedSession>,
        filter: &ProjectFilter,
    ) -> Result<SnapshotOutcome> {
        let admitted = self.admit(processed, filter)?;
        let (snapshot, path) = self.snapshot_from_records(admitted.records, admitted.quarantined)?;
        Ok(SnapshotOutcome {
            snapshot,
            path,
            quarantined: admitted.quarantined,
            excluded: admitted.excluded,
        })
    }

    /// Persist a snapshot of records that were already admitted
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written
    pub fn snapshot_from_records(
        &self,
        records: Vec<SessionRecord>,
        quarantined: usize,
    ) -> Result<(ExportSnapshot, PathBuf)> {
        let snapshot = ExportSnapshot::new(records, Utc::now())?;
        let path = self.artifacts.write_snapshot(&snapshot, quarantined)?;
        Ok((snapshot, path))
    }

    /// Persist the daemon's pending batch. Its summary goes to the daemon's
    /// own file so the reviewer's export summary stays accurate.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written
    pub fn batch_from_records(
        &self,
        records: Vec<SessionRecord>,
        quarantined: usize,
    ) -> Result<ExportSnapshot> {
        let snapshot = ExportSnapshot::new(records, Utc::now())?;
        self.artifacts.write_daemon_batch(&snapshot, quarantined)?;
        Ok(snapshot)
    }

    /// Case-insensitive search of a snapshot for the reviewer's full name
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the snapshot does not exist
    pub fn scan_for_name(&self, fingerprint: &str, name: &str) -> Result<FullNameScan> {
        let query = name.split_whitespace().collect::<Vec<_>>().join(" ");
        if query.is_empty() {
            bail!("Full name must not be empty");
        }
        let needle = query.to_lowercase();
        let body = self.artifacts.read_snapshot_body(fingerprint)?;

        let mut match_count = 0;
        let mut examples = Vec::new();
        for (idx, line) in body.lines().enumerate() {
            if !line.to_lowercase().contains(&needle) {
                continue;
            }
            match_count += 1;
            if examples.len() < MAX_SCAN_EXAMPLES {
                let mut excerpt = line.trim().to_string();
                if excerpt.chars().count() > MAX_EXCERPT_CHARS {
                    truncate_chars(&mut excerpt, MAX_EXCERPT_CHARS);
                    excerpt.push_str("...");
                }
                examples.push(ScanExample {
                    line: idx + 1,
                    excerpt,
                });
            }
        }

        log::info!(
            "Full-name scan of {}: {match_count} matching lines",
            fingerprint.chars().take(12).collect::<String>()
        );
        Ok(FullNameScan {
            fingerprint: fingerprint.to_string(),
            query: Some(query),
            skipped: false,
            match_count,
            examples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redaction::{RedactionEngine, RedactionRules};
    use codeclaw_storage::{Message, Session, TrajectoryLabel};

    fn processed(
        id: &str,
        project: &str,
        messages: Vec<Message>,
        rules: &RedactionRules,
    ) -> ProcessedSession {
        let engine = RedactionEngine::new(rules.clone(), 3).unwrap();
        let session = Session::new(id, "claude", project, messages);
        ProcessedSession {
            redacted: engine.redact(&session).unwrap(),
            label: TrajectoryLabel::CleanFirstTry,
        }
    }

    fn clean(id: &str, project: &str) -> ProcessedSession {
        processed(
            id,
            project,
            vec![Message::user("hello"), Message::assistant("hi")],
            &RedactionRules::default(),
        )
    }

    #[test]
    fn test_truncates_after_redaction() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 12);
        // The key straddles the truncation boundary
        let input = processed(
            "s1",
            "demo",
            vec![Message::assistant("run").with_tool_use("Bash", "echo abc sk-ABCDEF1234567890 done")],
            &RedactionRules::default(),
        );

        let record = snapshotter.build_record(&input);
        let tool_input = &record.messages[0].tool_uses[0].input;

        assert_eq!(tool_input, "echo abc [RE");
        assert!(!tool_input.contains("sk-"));
        assert_eq!(record.metadata.redaction_count, 1);
    }

    #[test]
    fn test_quarantined_sessions_leave_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let rules = RedactionRules {
            custom_strings: ["Acme Corp", "ProjectFalcon", "Zeta Labs", "hunter-ops", "blue harbor"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            ..RedactionRules::default()
        };
        let flagged = processed(
            "flagged",
            "demo",
            vec![Message::user(
                "Acme Corp, ProjectFalcon, Zeta Labs, hunter-ops and blue harbor",
            )],
            &rules,
        );
        assert!(flagged.redacted.is_quarantined());

        let outcome = snapshotter
            .snapshot(vec![flagged, clean("ok", "demo")], &ProjectFilter::all_projects())
            .unwrap();

        assert_eq!(outcome.quarantined, 1);
        assert_eq!(outcome.snapshot.len(), 1);
        assert_eq!(outcome.snapshot.records[0].session_id, "ok");

        let quarantine = snapshotter.artifacts().read_quarantine().unwrap();
        assert_eq!(quarantine.len(), 1);
        assert_eq!(quarantine[0].record.session_id, "flagged");
        assert_eq!(quarantine[0].finding_count, 5);

        let summary = snapshotter.artifacts().read_summary().unwrap().unwrap();
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.fingerprint, outcome.snapshot.fingerprint);
        assert!(outcome.path.ends_with(format!("{}.jsonl", outcome.snapshot.fingerprint)));
    }

    #[test]
    fn test_excluded_projects_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let filter = ProjectFilter {
            excluded: ["Secret-Client".to_string()].into_iter().collect(),
            ..ProjectFilter::default()
        };

        let outcome = snapshotter
            .snapshot(vec![clean("a", "secret-client"), clean("b", "demo")], &filter)
            .unwrap();

        assert_eq!(outcome.excluded, 1);
        assert_eq!(outcome.snapshot.session_ids().len(), 1);
        let rejects = snapshotter.artifacts().read_rejects().unwrap();
        assert_eq!(rejects.len(), 1);
        assert_eq!(rejects[0].origin, "a");
    }

    #[test]
    fn test_only_connected_projects_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let filter = ProjectFilter {
            excluded: ["api".to_string()].into_iter().collect(),
            connected: ["App".to_string(), "api".to_string()].into_iter().collect(),
        };

        let outcome = snapshotter
            .snapshot(
                vec![clean("a", "app"), clean("b", "api"), clean("c", "scratch")],
                &filter,
            )
            .unwrap();

        assert_eq!(outcome.snapshot.session_ids().len(), 1);
        assert_eq!(outcome.snapshot.records[0].session_id, "a");
        assert_eq!(outcome.excluded, 2);
        let reasons: Vec<String> = snapshotter
            .artifacts()
            .read_rejects()
            .unwrap()
            .into_iter()
            .map(|r| r.reason)
            .collect();
        assert!(reasons.contains(&"project is excluded from export".to_string()));
        assert!(reasons.contains(&"project is not connected for export".to_string()));
    }

    #[test]
    fn test_daemon_batch_keeps_export_summary() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let outcome = snapshotter
            .snapshot(vec![clean("a", "demo")], &ProjectFilter::all_projects())
            .unwrap();
        let record = snapshotter.build_record(&clean("b", "demo"));

        let batch = snapshotter.batch_from_records(vec![record], 2).unwrap();

        let summary = snapshotter.artifacts().read_summary().unwrap().unwrap();
        assert_eq!(summary.fingerprint, outcome.snapshot.fingerprint);
        let daemon = snapshotter.artifacts().read_daemon_summary().unwrap().unwrap();
        assert_eq!(daemon.fingerprint, batch.fingerprint);
        assert_eq!(daemon.quarantined, 2);
    }

    #[test]
    fn test_defects_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let session = Session::new(
            "d",
            "claude",
            "demo",
            vec![Message::user("hello"), Message::user("   ")],
        );
        let redacted = RedactionEngine::new(RedactionRules::default(), 3)
            .unwrap()
            .redact(&session)
            .unwrap();
        let item = ProcessedSession {
            redacted,
            label: TrajectoryLabel::CleanFirstTry,
        };

        let admitted = snapshotter.admit(vec![item], &ProjectFilter::all_projects()).unwrap();

        assert_eq!(admitted.records.len(), 1);
        let rejects = snapshotter.artifacts().read_rejects().unwrap();
        assert_eq!(rejects[0].origin, "d#messages[1]");
    }

    #[test]
    fn test_identical_content_same_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let all = ProjectFilter::all_projects();
        let first = snapshotter.snapshot(vec![clean("a", "demo")], &all).unwrap();
        let second = snapshotter.snapshot(vec![clean("a", "demo")], &all).unwrap();
        let third = snapshotter.snapshot(vec![clean("b", "demo")], &all).unwrap();

        assert_eq!(first.snapshot.fingerprint, second.snapshot.fingerprint);
        assert_ne!(first.snapshot.fingerprint, third.snapshot.fingerprint);
    }

    #[test]
    fn test_scan_for_name() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = ExportSnapshotter::new(ArtifactStore::new(dir.path()), 300);
        let records: Vec<SessionRecord> = (0..7)
            .map(|i| {
                let session = Session::new(
                    format!("s{i}"),
                    "claude",
                    "demo",
                    vec![Message::user(format!("note {i} from Jane Doe"))],
                );
                SessionRecord::from_session(
                    session,
                    RecordMetadata {
                        trajectory_type: TrajectoryLabel::CleanFirstTry,
                        redaction_count: 0,
                    },
                )
            })
            .collect();
        let (snapshot, _) = snapshotter.snapshot_from_records(records, 0).unwrap();

        let scan = snapshotter
            .scan_for_name(&snapshot.fingerprint, "  jane   DOE ")
            .unwrap();
        assert_eq!(scan.query.as_deref(), Some("jane DOE"));
        assert_eq!(scan.match_count, 7);
        assert_eq!(scan.examples.len(), 5);
        assert_eq!(scan.examples[0].line, 1);
        assert!(scan.examples[0].excerpt.contains("Jane Doe"));
        assert!(!scan.skipped);

        let scan = snapshotter.scan_for_name(&snapshot.fingerprint, "John Roe").unwrap();
        assert_eq!(scan.match_count, 0);
        assert!(scan.examples.is_empty());

        assert!(snapshotter.scan_for_name(&snapshot.fingerprint, "  ").is_err());
        assert!(snapshotter.scan_for_name("missing", "Jane").is_err());
    }
}
