//! Pure gate transitions. Each takes the current state and returns the next
//! one or the precondition that failed; nothing here touches storage.

use codeclaw_storage::{FullNameScan, GateState, PublisherConfig, ReviewAttestations, Stage};
use std::collections::BTreeSet;

use super::{ConfigAdditions, ConfirmRequest, GateError, ProjectSelection, PublishRequest};

/// Minimum attestation length after whitespace normalization
pub const MIN_ATTESTATION_CHARS: usize = 24;
/// Sessions a reviewer must have read by hand
pub const MIN_MANUAL_SCAN_SESSIONS: u32 = 20;

const SKIP_WORDS: &[&str] = &["skip", "declined", "opt out", "prefer not"];
const SENSITIVE_TOPICS: &[&str] = &["company", "client", "internal", "url", "domain", "tool", "name"];
const SENSITIVE_OUTCOMES: &[&str] = &["none", "no", "redact", "added", "updated", "configured"];

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_attestation(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Largest number mentioned in the text
fn largest_number(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn require_fingerprint<'a>(state: &'a GateState, provided: &str) -> Result<&'a str, GateError> {
    let current = state
        .current_fingerprint
        .as_deref()
        .ok_or(GateError::NothingExported)?;
    if current != provided {
        return Err(GateError::StaleFingerprint {
            expected: current.to_string(),
            provided: provided.to_string(),
        });
    }
    Ok(current)
}

fn require_stage(state: &GateState, required: Stage) -> Result<(), GateError> {
    if state.stage < required {
        return Err(GateError::StageNotReached {
            required,
            current: state.stage,
        });
    }
    Ok(())
}

/// Unconfigured -> Configured. Reconfiguring later keeps the stage.
///
/// # Errors
///
/// [`GateError::AuthMissing`] without usable credentials,
/// [`GateError::SourceScopeUnset`] without at least one source
pub fn configure(
    state: &GateState,
    credentials: Option<&PublisherConfig>,
    scope: &BTreeSet<String>,
) -> Result<GateState, GateError> {
    if !credentials.is_some_and(PublisherConfig::is_complete) {
        return Err(GateError::AuthMissing);
    }
    let scope: BTreeSet<String> = scope
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if scope.is_empty() {
        return Err(GateError::SourceScopeUnset);
    }

    let mut next = state.clone();
    next.source_scope = scope;
    if next.stage == Stage::Unconfigured {
        next.stage = Stage::Configured;
    }
    Ok(next)
}

/// Union the additions into the append-only lists. Returns the next state and
/// whether anything new was added. New redaction rules invalidate a
/// confirmation, since the reviewed snapshot predates them.
#[must_use]
pub fn merge_config(state: &GateState, additions: &ConfigAdditions) -> (GateState, bool) {
    fn union(target: &mut BTreeSet<String>, extra: &BTreeSet<String>) -> bool {
        let before = target.len();
        target.extend(
            extra
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
        target.len() != before
    }

    let mut next = state.clone();
    let mut changed = union(&mut next.excluded_projects, &additions.excluded_projects);
    changed |= union(&mut next.redact_strings, &additions.redact_strings);
    changed |= union(&mut next.redact_usernames, &additions.redact_usernames);

    if changed {
        void_confirmation(&mut next);
    }
    (next, changed)
}

fn void_confirmation(state: &mut GateState) {
    if state.stage >= Stage::Confirmed {
        state.stage = Stage::Exported;
        state.confirmed_fingerprint = None;
        state.review = None;
        state.publish_attestation = None;
    }
}

/// Change which projects exports draw from. Returns the next state and
/// whether the connected set changed; a change voids a confirmation the
/// same way new exclusions do.
#[must_use]
pub fn select_projects(state: &GateState, selection: &ProjectSelection) -> (GateState, bool) {
    let mut next = state.clone();
    match selection {
        ProjectSelection::Connect(names) => {
            next.connected_projects.extend(
                names
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
        ProjectSelection::Disconnect(names) => {
            next.connected_projects
                .retain(|name| !names.contains(name.as_str()));
        }
        ProjectSelection::All => next.connected_projects.clear(),
    }
    let changed = next.connected_projects != state.connected_projects;
    if changed {
        void_confirmation(&mut next);
    }
    (next, changed)
}

/// A new snapshot exists. Any confirmation is void and a configured gate
/// drops back to Exported, whatever stage it had reached. The voided
/// confirmation is remembered so a later publish of it reports staleness.
#[must_use]
pub fn record_export(state: &GateState, fingerprint: &str) -> GateState {
    let mut next = state.clone();
    next.current_fingerprint = Some(fingerprint.to_string());
    next.superseded_confirmation = state
        .confirmed_fingerprint
        .clone()
        .or_else(|| state.superseded_confirmation.clone())
        .filter(|confirmed| confirmed != fingerprint);
    next.confirmed_fingerprint = None;
    next.review = None;
    next.full_name_scan = None;
    next.publish_attestation = None;
    if next.stage >= Stage::Configured {
        next.stage = Stage::Exported;
    }
    next
}

/// Store a full-name scan result
///
/// # Errors
///
/// [`GateError::StaleFingerprint`] when the scan ran against an older snapshot
pub fn record_name_scan(state: &GateState, scan: FullNameScan) -> Result<GateState, GateError> {
    require_fingerprint(state, &scan.fingerprint)?;
    let mut next = state.clone();
    next.full_name_scan = Some(scan);
    Ok(next)
}

fn check_full_name(
    attestation: &str,
    scan: Option<&FullNameScan>,
    skip: bool,
    problems: &mut Vec<String>,
) {
    let lower = attestation.to_lowercase();
    if attestation.chars().count() < MIN_ATTESTATION_CHARS {
        problems.push("full-name attestation is too short".to_string());
        return;
    }
    if skip {
        if !lower.contains("full name") || !contains_any(&lower, SKIP_WORDS) {
            problems.push(
                "full-name attestation must say the reviewer declined or skipped the full-name scan"
                    .to_string(),
            );
        }
        return;
    }

    let Some(scan) = scan.filter(|s| !s.skipped) else {
        problems.push("no full-name scan was run against the current snapshot".to_string());
        return;
    };
    if !lower.contains("ask") || !lower.contains("scan") {
        problems.push(
            "full-name attestation must say the reviewer was asked and the export was scanned"
                .to_string(),
        );
        return;
    }
    let query = scan.query.as_deref().unwrap_or_default().to_lowercase();
    let missing_name = query
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .any(|token| !lower.contains(token));
    if missing_name {
        problems.push("full-name attestation must name the same person that was scanned for".to_string());
    }
}

fn check_sensitive(attestation: &str, problems: &mut Vec<String>) {
    let lower = attestation.to_lowercase();
    if attestation.chars().count() < MIN_ATTESTATION_CHARS {
        problems.push("sensitive-identifier attestation is too short".to_string());
    } else if !lower.contains("ask")
        || !contains_any(&lower, SENSITIVE_TOPICS)
        || !contains_any(&lower, SENSITIVE_OUTCOMES)
    {
        problems.push(
            "sensitive-identifier attestation must say what was asked and the outcome".to_string(),
        );
    }
}

fn check_manual_scan(attestation: &str, problems: &mut Vec<String>) -> Option<u32> {
    let lower = attestation.to_lowercase();
    let sessions = largest_number(&lower);
    if attestation.chars().count() < MIN_ATTESTATION_CHARS {
        problems.push("manual-scan attestation is too short".to_string());
    } else if !lower.contains("manual") || !lower.contains("scan") {
        problems.push("manual-scan attestation must mention a manual scan".to_string());
    } else if !sessions.is_some_and(|n| n >= MIN_MANUAL_SCAN_SESSIONS) {
        problems.push(format!(
            "manual-scan attestation must state at least {MIN_MANUAL_SCAN_SESSIONS} reviewed sessions"
        ));
    }
    sessions
}

/// Exported -> Confirmed. Every missing attestation is reported at once.
///
/// # Errors
///
/// [`GateError::NothingExported`], [`GateError::StageNotReached`],
/// [`GateError::StaleFingerprint`] or [`GateError::AttestationIncomplete`]
pub fn confirm(state: &GateState, request: &ConfirmRequest) -> Result<GateState, GateError> {
    let current = require_fingerprint(state, &request.fingerprint)?.to_string();
    require_stage(state, Stage::Exported)?;

    let full_name = normalize_attestation(&request.full_name_attestation);
    let sensitive = normalize_attestation(&request.sensitive_attestation);
    let manual = normalize_attestation(&request.manual_scan_attestation);

    let scan = state
        .full_name_scan
        .as_ref()
        .filter(|scan| scan.fingerprint == current);
    let mut problems = Vec::new();
    check_full_name(&full_name, scan, request.skip_full_name_scan, &mut problems);
    check_sensitive(&sensitive, &mut problems);
    let manual_sessions = check_manual_scan(&manual, &mut problems);
    if !problems.is_empty() {
        return Err(GateError::AttestationIncomplete(problems));
    }

    let mut next = state.clone();
    if request.skip_full_name_scan {
        next.full_name_scan = Some(FullNameScan::skipped(current.clone()));
    }
    next.review = Some(ReviewAttestations {
        asked_full_name: full_name,
        asked_sensitive_entities: sensitive,
        manual_scan_done: manual,
        manual_scan_sessions: manual_sessions,
        pii_findings: request.pii_findings,
    });
    next.superseded_confirmation = None;
    next.confirmed_fingerprint = Some(current);
    next.stage = Stage::Confirmed;
    Ok(next)
}

/// Check that a push of `fingerprint` may go ahead
///
/// # Errors
///
/// The first unmet precondition. Automatic pushes need configuration only;
/// the daemon pushes its own batch, not the reviewer's export. Manual pushes
/// are checked in order: something exported, fingerprint current, the
/// reviewed export not superseded, stage reached, attestation given.
pub fn authorize_publish(
    state: &GateState,
    fingerprint: &str,
    request: &PublishRequest,
) -> Result<(), GateError> {
    match request {
        PublishRequest::Automatic => {
            require_stage(state, Stage::Configured)?;
            if state.source_scope.is_empty() {
                return Err(GateError::SourceScopeUnset);
            }
            Ok(())
        }
        PublishRequest::Manual { attestation } => {
            let current = require_fingerprint(state, fingerprint)?;
            let stale = state
                .confirmed_fingerprint
                .as_deref()
                .filter(|confirmed| *confirmed != current)
                .or_else(|| {
                    state
                        .superseded_confirmation
                        .as_deref()
                        .filter(|_| state.stage < Stage::Confirmed)
                });
            if let Some(reviewed) = stale {
                return Err(GateError::StaleFingerprint {
                    expected: current.to_string(),
                    provided: reviewed.to_string(),
                });
            }
            require_stage(state, Stage::Confirmed)?;

            let attestation = normalize_attestation(attestation);
            let lower = attestation.to_lowercase();
            if attestation.chars().count() < MIN_ATTESTATION_CHARS
                || !lower.contains("approv")
                || !(lower.contains("publish") || lower.contains("push"))
            {
                return Err(GateError::AttestationIncomplete(vec![
                    "publish attestation must state that publishing was explicitly approved"
                        .to_string(),
                ]));
            }
            Ok(())
        }
    }
}

/// Record a successful push
#[must_use]
pub fn record_publish(state: &GateState, fingerprint: &str, request: &PublishRequest) -> GateState {
    let mut next = state.clone();
    match request {
        PublishRequest::Automatic => {
            next.total_automatic_pushes += 1;
        }
        PublishRequest::Manual { attestation } => {
            next.total_publishes += 1;
            next.last_published_fingerprint = Some(fingerprint.to_string());
            next.publish_attestation = Some(normalize_attestation(attestation));
            // A newer export may have landed while the upload was running
            if next.current_fingerprint.as_deref() == Some(fingerprint) {
                next.stage = Stage::Published;
            }
        }
    }
    next
}
