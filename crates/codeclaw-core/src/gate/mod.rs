//! Publish gate: the only path from a local snapshot to a dataset host.

pub mod transitions;


use anyhow::Context;
use chrono::Utc;
use codeclaw_integrations::{PublishError, Publisher, PushReceipt};
use codeclaw_storage::{
    ExportSnapshot, FullNameScan, GateState, PublisherConfig, PushKind, PushRecord, Stage,
    StateStore,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A crashed holder's lease lapses after this long
const PUSH_LEASE_TTL_MINUTES: i64 = 15;
/// How long a push waits for another process to finish its own
const PUSH_LEASE_WAIT: Duration = Duration::from_secs(120);
const PUSH_LEASE_POLL: Duration = Duration::from_millis(50);

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

/// A refused gate transition. Each names the step to redo.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Upload credentials are missing or incomplete; run `codeclaw configure`")]
    AuthMissing,

    #[error("No source scope set; run `codeclaw configure --source <name>`")]
    SourceScopeUnset,

    #[error("Stale fingerprint {provided}: the current export is {expected}; review and confirm it first")]
    StaleFingerprint { expected: String, provided: String },

    #[error("Attestation incomplete: {}", .0.join("; "))]
    AttestationIncomplete(Vec<String>),

    #[error("Gate is at stage {current}, {required} is required")]
    StageNotReached { required: Stage, current: Stage },

    #[error("Nothing has been exported yet; run `codeclaw export`")]
    NothingExported,

    #[error("Another push is in flight; try again once it finishes")]
    PushInProgress,
}

/// Anything that can stop a gate operation
#[derive(Error, Debug)]
pub enum GateFailure {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Entries to union into the append-only configuration lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigAdditions {
    pub excluded_projects: BTreeSet<String>,
    pub redact_strings: BTreeSet<String>,
    pub redact_usernames: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub fingerprint: String,
    pub full_name_attestation: String,
    pub sensitive_attestation: String,
    pub manual_scan_attestation: String,
    pub skip_full_name_scan: bool,
    /// Advisory rescan hits, recorded with the review
    pub pii_findings: usize,
}

/// A change to the connected-project set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelection {
    Connect(BTreeSet<String>),
    Disconnect(BTreeSet<String>),
    /// Clear the set: every project in scope is exported again
    All,
}

/// How a push is authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishRequest {
    /// Reviewer-confirmed publication with an explicit approval statement
    Manual { attestation: String },
    /// Daemon accumulation; needs configuration only
    Automatic,
}

impl PublishRequest {
    #[must_use]
    pub fn kind(&self) -> PushKind {
        match self {
            Self::Manual { .. } => PushKind::Manual,
            Self::Automatic => PushKind::Automatic,
        }
    }
}

/// Releases the store-wide push lease when the push ends, however it ends
struct PushLease<'a> {
    store: &'a dyn StateStore,
    holder: &'a str,
}

impl Drop for PushLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_push_lease(self.holder) {
            log::warn!("Failed to release push lease {}: {e:#}", self.holder);
        }
    }
}

/// Persists gate transitions and serializes pushes.
///
/// Every transition is one atomic read-modify-write in the store, so the
/// daemon and a CLI process sharing the database never lose each other's
/// updates. Uploads hold the in-process push lock and the store's push
/// lease, so at most one push (manual or automatic) is in flight across
/// all processes.
pub struct GateController {
    store: Arc<dyn StateStore>,
    holder: String,
    push_lock: tokio::sync::Mutex<()>,
}

impl GateController {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let holder = format!(
            "{}-{}",
            std::process::id(),
            NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            store,
            holder,
            push_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded
    pub fn state(&self) -> anyhow::Result<GateState> {
        self.store.load_gate_state()
    }

    fn apply<F>(&self, transition: F) -> Result<GateState, GateFailure>
    where
        F: FnOnce(&GateState) -> Result<GateState, GateError>,
    {
        let mut transition = Some(transition);
        let mut refused = None;
        let mut previous = None;
        let written = self.store.update_gate_state(&mut |current| {
            let transition = transition.take()?;
            match transition(current) {
                Ok(next) => {
                    previous = Some(current.stage);
                    Some(next)
                }
                Err(e) => {
                    refused = Some(e);
                    None
                }
            }
        })?;

        if let Some(e) = refused {
            return Err(e.into());
        }
        let next = written.context("Gate transition was not applied")?;
        if let Some(stage) = previous.filter(|stage| *stage != next.stage) {
            log::info!("Gate stage {stage} -> {}", next.stage);
        }
        Ok(next)
    }

    async fn acquire_push_lease(&self) -> Result<PushLease<'_>, GateFailure> {
        let ttl = chrono::Duration::minutes(PUSH_LEASE_TTL_MINUTES);
        let deadline = tokio::time::Instant::now() + PUSH_LEASE_WAIT;
        loop {
            if self.store.try_acquire_push_lease(&self.holder, ttl)? {
                return Ok(PushLease {
                    store: &*self.store,
                    holder: &self.holder,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(GateError::PushInProgress.into());
            }
            log::debug!("Push lease busy, waiting ({})", self.holder);
            tokio::time::sleep(PUSH_LEASE_POLL).await;
        }
    }

    /// # Errors
    ///
    /// Returns [`GateError::AuthMissing`] or [`GateError::SourceScopeUnset`]
    /// when a precondition is missing, or a storage error
    pub fn configure(
        &self,
        credentials: Option<&PublisherConfig>,
        scope: &BTreeSet<String>,
    ) -> Result<GateState, GateFailure> {
        self.apply(|state| transitions::configure(state, credentials, scope))
    }

    /// Returns the new state and whether anything was added
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub fn merge_config(
        &self,
        additions: &ConfigAdditions,
    ) -> Result<(GateState, bool), GateFailure> {
        let mut changed = false;
        let state = self.apply(|state| {
            let (next, added) = transitions::merge_config(state, additions);
            changed = added;
            Ok(next)
        })?;
        Ok((state, changed))
    }

    /// Returns the new state and whether the connected set changed
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub fn select_projects(
        &self,
        selection: &ProjectSelection,
    ) -> Result<(GateState, bool), GateFailure> {
        let mut changed = false;
        let state = self.apply(|state| {
            let (next, updated) = transitions::select_projects(state, selection);
            changed = updated;
            Ok(next)
        })?;
        Ok((state, changed))
    }

    /// # Errors
    ///
    /// Returns a storage error
    pub fn record_export(&self, fingerprint: &str) -> Result<GateState, GateFailure> {
        self.apply(|state| Ok(transitions::record_export(state, fingerprint)))
    }

    /// # Errors
    ///
    /// Returns [`GateError::StaleFingerprint`] or a storage error
    pub fn record_name_scan(&self, scan: FullNameScan) -> Result<GateState, GateFailure> {
        self.apply(|state| transitions::record_name_scan(state, scan))
    }

    /// # Errors
    ///
    /// Returns the unmet confirmation precondition or a storage error
    pub fn confirm(&self, request: &ConfirmRequest) -> Result<GateState, GateFailure> {
        self.apply(|state| transitions::confirm(state, request))
    }

    /// Check a push against the current state without uploading anything
    ///
    /// # Errors
    ///
    /// Returns the first unmet precondition or a storage error
    pub fn authorize(&self, fingerprint: &str, request: &PublishRequest) -> Result<(), GateFailure> {
        let state = self.store.load_gate_state()?;
        transitions::authorize_publish(&state, fingerprint, request)?;
        Ok(())
    }

    /// Authorize, upload and record one snapshot.
    ///
    /// Holds the push lock and the push lease for the whole attempt. A
    /// [`PublishError`] from the publisher is returned unchanged and leaves
    /// the gate state untouched.
    ///
    /// # Errors
    ///
    /// Returns the gate precondition that failed, [`GateError::PushInProgress`]
    /// when another process keeps the lease, the publisher's error, or a
    /// storage error
    pub async fn publish(
        &self,
        publisher: &dyn Publisher,
        snapshot: &ExportSnapshot,
        request: &PublishRequest,
    ) -> Result<PushReceipt, GateFailure> {
        let _push = self.push_lock.lock().await;
        let _lease = self.acquire_push_lease().await?;

        if snapshot.is_empty() {
            return Err(GateError::NothingExported.into());
        }
        let state = self.store.load_gate_state()?;
        transitions::authorize_publish(&state, &snapshot.fingerprint, request)?;

        log::info!(
            "Pushing snapshot {} ({} sessions, {}) to {}",
            snapshot.short_fingerprint(),
            snapshot.len(),
            request.kind(),
            publisher.name()
        );
        let receipt = publisher.upload(snapshot).await?;

        self.apply(|state| {
            Ok(transitions::record_publish(
                state,
                &receipt.fingerprint,
                request,
            ))
        })?;
        self.store
            .record_push(&PushRecord {
                fingerprint: receipt.fingerprint.clone(),
                kind: request.kind(),
                destination: receipt.destination.clone(),
                sessions: receipt.sessions,
                pushed_at: Utc::now(),
            })
            .context("Failed to record push history")?;
        Ok(receipt)
    }
}
