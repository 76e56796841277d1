//! Manual export: scan the sources in scope, redact, classify and write a
//! new snapshot for review.

use anyhow::{Context, Result};
use codeclaw_core::{
    adapters_for_scope, load_sessions, ExportSnapshotter, GateError, Pipeline, ProjectFilter,
    RedactionEngine, RedactionRules, SnapshotOutcome, SourceAdapter,
};
use codeclaw_storage::{RejectRecord, Session};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tabled::{Table, Tabled};

use super::helpers::Workspace;

#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "Trajectory")]
    label: String,
    #[tabled(rename = "Sessions")]
    sessions: usize,
}

pub struct ExportReport {
    pub outcome: SnapshotOutcome,
    pub scanned: usize,
    pub rejected: usize,
}

/// One session per id. A resumed conversation can show up in more than one
/// file; the longer copy wins.
pub(crate) fn dedupe_by_id(sessions: Vec<Session>) -> Vec<Session> {
    let mut by_id: BTreeMap<String, Session> = BTreeMap::new();
    for session in sessions {
        match by_id.get(&session.session_id) {
            Some(existing) if existing.messages.len() > session.messages.len() => {}
            _ => {
                by_id.insert(session.session_id.clone(), session);
            }
        }
    }
    by_id.into_values().collect()
}

/// Run the export pipeline over `adapters` and record the new snapshot with
/// the gate. Any earlier confirmation is void afterwards.
pub async fn export_sessions(
    ws: &Workspace,
    adapters: Vec<Arc<dyn SourceAdapter>>,
) -> Result<ExportReport> {
    let settings = ws.db.get_settings()?;
    let gate = ws.gate();
    let state = gate.state()?;
    let artifacts = ws.artifacts()?;

    let (sessions, errors) = tokio::task::spawn_blocking(move || load_sessions(&adapters))
        .await
        .context("Source scan panicked")?;
    for error in &errors {
        log::warn!("{error}");
        artifacts.append_reject(&RejectRecord::new(
            error.path().display().to_string(),
            error.to_string(),
        ))?;
    }
    let sessions = dedupe_by_id(sessions);
    let scanned = sessions.len();
    log::info!("Exporting {scanned} sessions ({} unreadable files)", errors.len());

    let rules = RedactionRules::for_machine(
        ws.salt()?,
        &state.redact_usernames,
        &state.redact_strings,
    );
    let engine = RedactionEngine::new(rules, settings.quarantine_threshold)?;
    let processed = Pipeline::new(engine, settings.worker_count)
        .process(sessions)
        .await?;

    let snapshotter = ExportSnapshotter::new(artifacts, settings.max_tool_input_chars);
    let outcome = snapshotter.snapshot(processed, &ProjectFilter::from_state(&state))?;
    gate.record_export(&outcome.snapshot.fingerprint)?;

    Ok(ExportReport {
        outcome,
        scanned,
        rejected: errors.len(),
    })
}

/// Adapters for `sources`, or for the configured scope when none are given
pub fn scoped_adapters(ws: &Workspace, sources: &[String]) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let scope: BTreeSet<String> = if sources.is_empty() {
        ws.gate().state()?.source_scope
    } else {
        sources.iter().map(|s| s.trim().to_lowercase()).collect()
    };
    if scope.is_empty() {
        return Err(GateError::SourceScopeUnset.into());
    }
    Ok(adapters_for_scope(&scope)?
        .into_iter()
        .map(Arc::from)
        .collect())
}

pub async fn handle_export(ws: &Workspace, sources: &[String]) -> Result<()> {
    let adapters = scoped_adapters(ws, sources)?;
    let report = export_sessions(ws, adapters).await?;
    let snapshot = &report.outcome.snapshot;

    println!("\nExport {}", snapshot.short_fingerprint());
    println!("{}", "\u{2550}".repeat(28));
    println!("Sessions scanned:   {}", report.scanned);
    println!("Sessions exported:  {}", snapshot.len());
    println!("Quarantined:        {}", report.outcome.quarantined);
    println!("Excluded projects:  {}", report.outcome.excluded);
    println!("Unreadable files:   {}", report.rejected);
    println!("Redactions:         {}", snapshot.total_redactions());

    if !snapshot.is_empty() {
        let rows: Vec<LabelRow> = snapshot
            .label_breakdown()
            .into_iter()
            .map(|(label, sessions)| LabelRow { label, sessions })
            .collect();
        println!("\n{}", Table::new(rows));
    }

    println!("\nSnapshot: {}", report.outcome.path.display());
    println!("Fingerprint: {}", snapshot.fingerprint);
    if snapshot.is_empty() {
        println!("\nNothing to publish.");
    } else {
        println!("\nReview before publishing:");
        println!("  codeclaw scan-name \"<your full name>\"");
        println!(
            "  codeclaw confirm --fingerprint {} --full-name ... --sensitive ... --manual-scan ...",
            snapshot.fingerprint
        );
    }
    Ok(())
}
