//! Redaction preview: run the redaction passes over the sessions in scope
//! and report what would change. Nothing is written and the gate is not
//! touched.

use anyhow::{Context, Result};
use codeclaw_core::{
    load_sessions, Pipeline, ProjectFilter, RedactionEngine, RedactionRules, SourceAdapter,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tabled::{Table, Tabled};

use super::export::{dedupe_by_id, scoped_adapters};
use super::helpers::{mask_secret, print_heading, Workspace};

const MAX_EXAMPLES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct DiffExample {
    #[tabled(rename = "Session")]
    pub session_id: String,
    #[tabled(rename = "Project")]
    pub project: String,
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Category")]
    pub category: String,
    /// Masked original text
    #[tabled(rename = "Text")]
    pub text: String,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Finding")]
    name: String,
    #[tabled(rename = "Count")]
    count: usize,
}

#[derive(Debug, Default)]
pub struct DiffReport {
    pub sessions_scanned: usize,
    pub projects_scanned: usize,
    pub total_redactions: usize,
    pub by_layer: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub examples: Vec<DiffExample>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub sources: Vec<String>,
    /// Stop after this many sessions
    pub limit: Option<usize>,
    /// Ignore the connected-project selection
    pub all_projects: bool,
}

/// Redact the sessions `adapters` find, in memory only
pub async fn preview_redactions(
    ws: &Workspace,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    options: &DiffOptions,
) -> Result<DiffReport> {
    let settings = ws.db.get_settings()?;
    let state = ws.gate().state()?;
    let filter = if options.all_projects {
        ProjectFilter {
            connected: BTreeSet::new(),
            ..ProjectFilter::from_state(&state)
        }
    } else {
        ProjectFilter::from_state(&state)
    };

    let (sessions, errors) = tokio::task::spawn_blocking(move || load_sessions(&adapters))
        .await
        .context("Source scan panicked")?;
    for error in &errors {
        log::warn!("{error}");
    }
    let sessions: Vec<_> = dedupe_by_id(sessions)
        .into_iter()
        .filter(|s| filter.rejection(&s.project).is_none())
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();

    let rules = RedactionRules::for_machine(
        ws.salt()?,
        &state.redact_usernames,
        &state.redact_strings,
    );
    let engine = RedactionEngine::new(rules, settings.quarantine_threshold)?;
    let processed = Pipeline::new(engine, settings.worker_count)
        .process(sessions)
        .await?;

    let mut report = DiffReport {
        sessions_scanned: processed.len(),
        ..DiffReport::default()
    };
    let mut projects = BTreeSet::new();
    for item in &processed {
        let session = item.redacted.session();
        projects.insert(session.project.clone());
        for finding in item.redacted.findings() {
            report.total_redactions += 1;
            *report.by_layer.entry(finding.layer.to_string()).or_default() += 1;
            *report.by_kind.entry(finding.kind.clone()).or_default() += 1;
            if report.examples.len() < MAX_EXAMPLES {
                report.examples.push(DiffExample {
                    session_id: session.session_id.clone(),
                    project: session.project.clone(),
                    field: finding.location.to_string(),
                    category: format!("{}/{}", finding.layer, finding.kind),
                    text: mask_secret(&finding.original),
                });
            }
        }
    }
    report.projects_scanned = projects.len();
    Ok(report)
}

fn count_rows(counts: &BTreeMap<String, usize>) -> Vec<CountRow> {
    counts
        .iter()
        .map(|(name, count)| CountRow {
            name: name.clone(),
            count: *count,
        })
        .collect()
}

pub async fn handle_diff(ws: &Workspace, options: &DiffOptions) -> Result<()> {
    let adapters = scoped_adapters(ws, &options.sources)?;
    let report = preview_redactions(ws, adapters, options).await?;

    print_heading("Redaction preview");
    println!("Sessions scanned:  {}", report.sessions_scanned);
    println!("Projects scanned:  {}", report.projects_scanned);
    println!("Redactions:        {}", report.total_redactions);
    if report.total_redactions == 0 {
        println!("\nNothing would be redacted.");
        return Ok(());
    }

    println!("\n{}", Table::new(count_rows(&report.by_layer)));
    println!("\n{}", Table::new(count_rows(&report.by_kind)));
    print_heading("Examples");
    println!("{}", Table::new(&report.examples));
    if report.total_redactions > report.examples.len() {
        println!(
            "({} more not shown)",
            report.total_redactions - report.examples.len()
        );
    }
    Ok(())
}
