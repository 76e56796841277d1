/// Review and publish command handlers: the manual path through the gate
use anyhow::Result;
use codeclaw_core::{
    ConfirmRequest, ExportSnapshotter, GateError, GateFailure, PiiReport, PiiScanner,
    PublishRequest,
};
use codeclaw_integrations::{publisher_for, PushReceipt};
use codeclaw_storage::{GateState, PublisherConfig};
use tabled::{Table, Tabled};

use super::helpers::{print_heading, truncate_str, Workspace};

#[derive(Tabled)]
struct PushRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Sessions")]
    sessions: usize,
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
    #[tabled(rename = "Destination")]
    destination: String,
}

fn current_fingerprint(state: &GateState) -> Result<String> {
    Ok(state
        .current_fingerprint
        .clone()
        .ok_or(GateError::NothingExported)?)
}

fn short_or_none(fingerprint: Option<&str>) -> String {
    fingerprint.map_or_else(|| "none".to_string(), |f| truncate_str(f, 12))
}

/// Search the current snapshot for the reviewer's full name and keep the
/// result for `confirm`
pub fn handle_scan_name(ws: &Workspace, name: &str) -> Result<()> {
    let gate = ws.gate();
    let fingerprint = current_fingerprint(&gate.state()?)?;
    let settings = ws.db.get_settings()?;
    let snapshotter = ExportSnapshotter::new(ws.artifacts()?, settings.max_tool_input_chars);

    let scan = snapshotter.scan_for_name(&fingerprint, name)?;
    let matches = scan.match_count;
    let examples = scan.examples.clone();
    gate.record_name_scan(scan)?;

    if matches == 0 {
        println!("No matches for the full name in snapshot {}", truncate_str(&fingerprint, 12));
        return Ok(());
    }
    println!("{matches} lines mention the full name:");
    for example in examples {
        println!("  line {}: {}", example.line, example.excerpt);
    }
    println!("\nAdd it with `codeclaw config redact \"<name>\"`, export again and rescan.");
    Ok(())
}

/// Rescan the current snapshot for leftovers the redaction passes missed
pub fn rescan_snapshot(ws: &Workspace, fingerprint: &str) -> Result<PiiReport> {
    let body = ws.artifacts()?.read_snapshot_body(fingerprint)?;
    Ok(PiiScanner::new()?.scan(&body))
}

fn print_pii_report(report: &PiiReport) {
    if report.is_clean() {
        println!("PII rescan: nothing found");
        return;
    }
    println!("PII rescan found {} possible leftovers (advisory):", report.total());
    for (category, values) in report.categories() {
        println!("  {category}:");
        for value in values {
            println!("    {}", truncate_str(&value, 60));
        }
    }
    for finding in &report.high_entropy {
        log::debug!(
            "High-entropy token ({:.2} bits): {}",
            finding.entropy,
            finding.context
        );
    }
    println!("Add real leftovers with `codeclaw config redact ...` and export again.");
}

/// Move the gate to Confirmed, or list every attestation still missing.
/// The current snapshot is rescanned first; findings are shown and recorded
/// but never block confirmation.
pub fn handle_confirm(ws: &Workspace, mut request: ConfirmRequest) -> Result<()> {
    let current = current_fingerprint(&ws.gate().state()?)?;
    if request.fingerprint.is_empty() {
        request.fingerprint.clone_from(&current);
    }
    if request.fingerprint == current {
        let report = rescan_snapshot(ws, &current)?;
        print_pii_report(&report);
        request.pii_findings = report.total();
    }
    match ws.gate().confirm(&request) {
        Ok(state) => {
            println!(
                "Confirmed snapshot {}",
                truncate_str(state.confirmed_fingerprint.as_deref().unwrap_or_default(), 12)
            );
            println!("Publish with: codeclaw publish --attestation \"...\"");
            Ok(())
        }
        Err(GateFailure::Gate(GateError::AttestationIncomplete(problems))) => {
            println!("Confirmation refused:");
            for problem in &problems {
                println!("  - {problem}");
            }
            anyhow::bail!("{} attestation problems", problems.len())
        }
        Err(e) => Err(e.into()),
    }
}

/// Publish the confirmed snapshot to the configured dataset host
pub async fn publish_confirmed(
    ws: &Workspace,
    fingerprint: Option<String>,
    attestation: String,
) -> Result<PushReceipt> {
    let gate = ws.gate();
    let state = gate.state()?;
    // A re-export clears the confirmation but remembers what was reviewed,
    // so the default target is still the reviewed snapshot
    let fingerprint = match fingerprint
        .or_else(|| state.confirmed_fingerprint.clone())
        .or_else(|| state.superseded_confirmation.clone())
    {
        Some(fp) => fp,
        None => current_fingerprint(&state)?,
    };
    let request = PublishRequest::Manual { attestation };
    gate.authorize(&fingerprint, &request)?;
    let config = ws
        .db
        .get_publisher_config()?
        .filter(PublisherConfig::is_complete)
        .ok_or(GateError::AuthMissing)?;
    let publisher = publisher_for(&config)?;
    let snapshot = ws.artifacts()?.read_snapshot(&fingerprint)?;

    let receipt = gate.publish(&*publisher, &snapshot, &request).await?;
    Ok(receipt)
}

pub async fn handle_publish(
    ws: &Workspace,
    fingerprint: Option<String>,
    attestation: String,
) -> Result<()> {
    let receipt = publish_confirmed(ws, fingerprint, attestation).await?;
    println!(
        "Published {} sessions ({}) to {}",
        receipt.sessions,
        truncate_str(&receipt.fingerprint, 12),
        receipt.destination
    );
    Ok(())
}

pub fn handle_status(ws: &Workspace) -> Result<()> {
    let state = ws.gate().state()?;

    print_heading("Publish gate");
    println!("Stage: {} ({}/4)", state.stage, state.stage.number());
    println!(
        "Current export:   {}",
        short_or_none(state.current_fingerprint.as_deref())
    );
    println!(
        "Confirmed export: {}",
        short_or_none(state.confirmed_fingerprint.as_deref())
    );
    if let Some(scan) = &state.full_name_scan {
        if scan.skipped {
            println!("Full-name scan:   skipped");
        } else {
            println!("Full-name scan:   {} matches", scan.match_count);
        }
    }
    if let Some(review) = &state.review {
        println!("PII rescan:       {} findings", review.pii_findings);
    }
    if !state.connected_projects.is_empty() {
        println!("Connected:        {} projects", state.connected_projects.len());
    }
    println!(
        "Pushes:           {} manual, {} automatic",
        state.total_publishes, state.total_automatic_pushes
    );

    let artifacts = ws.artifacts()?;
    println!(
        "Encryption:       {}",
        if artifacts.is_encrypting() { "on" } else { "off" }
    );
    if let Some(summary) = artifacts.read_summary()? {
        print_heading("Latest export");
        println!("Sessions: {}", summary.total_sessions);
        println!("Redactions: {}", summary.total_redactions);
        println!("Quarantined: {}", summary.quarantined);
        for (label, count) in &summary.trajectory_types {
            println!("  {label}: {count}");
        }
    }

    let pushes = ws.db.get_recent_pushes(10)?;
    if !pushes.is_empty() {
        print_heading("Recent pushes");
        let rows: Vec<PushRow> = pushes
            .into_iter()
            .map(|p| PushRow {
                when: p.pushed_at.format("%Y-%m-%d %H:%M").to_string(),
                kind: p.kind.to_string(),
                sessions: p.sessions,
                fingerprint: truncate_str(&p.fingerprint, 12),
                destination: p.destination,
            })
            .collect();
        println!("{}", Table::new(rows));
    }
    Ok(())
}
