/// Quarantine store and rejects log review
use anyhow::Result;
use codeclaw_storage::{QuarantineRecord, RejectRecord};
use tabled::{Table, Tabled};

use super::helpers::{truncate_str, Workspace};

#[derive(Tabled)]
struct QuarantineRow {
    #[tabled(rename = "Session")]
    session: String,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Findings")]
    findings: usize,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Quarantined")]
    quarantined_at: String,
}

impl From<&QuarantineRecord> for QuarantineRow {
    fn from(entry: &QuarantineRecord) -> Self {
        Self {
            session: truncate_str(&entry.record.session_id, 12),
            project: truncate_str(&entry.record.project, 20),
            findings: entry.finding_count,
            reason: truncate_str(&entry.reason, 40),
            quarantined_at: entry.quarantined_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Tabled)]
struct RejectRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Origin")]
    origin: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&RejectRecord> for RejectRow {
    fn from(entry: &RejectRecord) -> Self {
        Self {
            when: entry.recorded_at.format("%Y-%m-%d %H:%M").to_string(),
            origin: truncate_str(&entry.origin, 48),
            reason: truncate_str(&entry.reason, 60),
        }
    }
}

pub fn handle_quarantine_list(ws: &Workspace) -> Result<()> {
    let entries = ws.artifacts()?.read_quarantine()?;
    if entries.is_empty() {
        println!("Quarantine is empty.");
        return Ok(());
    }
    let rows: Vec<QuarantineRow> = entries.iter().map(QuarantineRow::from).collect();
    println!("{}", Table::new(rows));
    println!("\n{} quarantined sessions. Nothing here is exported.", entries.len());
    Ok(())
}

/// Latest quarantined copy of a session, if any
fn find_quarantined(entries: Vec<QuarantineRecord>, session_id: &str) -> Option<QuarantineRecord> {
    entries
        .into_iter()
        .rev()
        .find(|entry| entry.record.session_id == session_id)
}

/// Print the redacted record so a reviewer can judge the findings
pub fn handle_quarantine_show(ws: &Workspace, session_id: &str) -> Result<()> {
    let entries = ws.artifacts()?.read_quarantine()?;
    let Some(entry) = find_quarantined(entries, session_id) else {
        anyhow::bail!("No quarantined session {session_id}");
    };
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

pub fn handle_rejects(ws: &Workspace, limit: usize) -> Result<()> {
    let entries = ws.artifacts()?.read_rejects()?;
    if entries.is_empty() {
        println!("No rejected files or sessions.");
        return Ok(());
    }
    let skip = entries.len().saturating_sub(limit);
    let rows: Vec<RejectRow> = entries.iter().skip(skip).map(RejectRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}
