//! Background daemon: watch the sources, keep the pending queue, push
//! automatically once enough sessions have accumulated.

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use codeclaw_integrations::{publisher_for, PublishError, Publisher};
use codeclaw_storage::{
    load_or_create_salt, ArtifactStore, DaemonState, Database, PublisherConfig, RejectRecord,
    Settings, StateStore,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::config::Paths;
use crate::gate::{GateController, GateError, GateFailure, PublishRequest};
use crate::ipc::{listen, ControlMessage, DaemonIpcHandler, DaemonStatus, IpcRequest, IpcResponse};
use crate::pipeline::Pipeline;
use crate::redaction::{RedactionEngine, RedactionRules};
use crate::snapshot::{ExportSnapshotter, ProjectFilter};
use crate::sources::{all_adapters, load_sessions, SourceAdapter};
use crate::watcher::spawn_watcher;

/// Used when no backoff tiers are configured
const FALLBACK_RETRY: Duration = Duration::from_secs(60);
/// Placeholder deadline for the disabled retry branch
const IDLE: Duration = Duration::from_secs(3600);

/// Delay before retry number `attempts` (1-based). Past the last tier the
/// last tier repeats indefinitely.
#[must_use]
pub fn backoff_delay(tiers_secs: &[u64], attempts: u32) -> Duration {
    let idx = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
    tiers_secs
        .get(idx)
        .or_else(|| tiers_secs.last())
        .map_or(FALLBACK_RETRY, |secs| Duration::from_secs(*secs))
}

fn deadline(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

fn reject_key(path: &std::path::Path) -> String {
    format!("file:{}", path.display())
}

pub struct Daemon {
    db: Arc<Database>,
    gate: GateController,
    publisher: Option<Arc<dyn Publisher>>,
    snapshotter: ExportSnapshotter,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    salt: String,
    settings: Settings,
    state: DaemonState,
}

impl Daemon {
    /// Build a daemon over an open database and restore its persisted queue
    ///
    /// # Errors
    ///
    /// Returns an error if settings or daemon state cannot be loaded
    pub fn new(
        db: Arc<Database>,
        publisher: Option<Arc<dyn Publisher>>,
        artifacts: ArtifactStore,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        salt: String,
    ) -> Result<Self> {
        let settings = db.get_settings()?;
        let state = db.load_daemon_state()?;
        let mut daemon = Self {
            gate: GateController::new(db.clone()),
            snapshotter: ExportSnapshotter::new(artifacts, settings.max_tool_input_chars),
            db,
            publisher,
            adapters,
            salt,
            settings,
            state,
        };
        daemon.recover();
        Ok(daemon)
    }

    /// Daemon over the standard data directory
    ///
    /// # Errors
    ///
    /// Returns an error if the database, salt or publisher cannot be set up
    pub fn from_paths(paths: &Paths) -> Result<Self> {
        std::fs::create_dir_all(paths.root())
            .with_context(|| format!("Failed to create {}", paths.root().display()))?;
        let db = Arc::new(Database::open(&paths.database())?);
        let publisher = db
            .get_publisher_config()?
            .filter(PublisherConfig::is_complete)
            .map(|config| publisher_for(&config))
            .transpose()?;
        if publisher.is_none() {
            log::warn!("No publisher configured; sessions will queue but not push");
        }
        let salt = load_or_create_salt(&paths.salt())?;
        let artifacts = ArtifactStore::open(paths.root(), db.get_settings()?.encrypt_artifacts)?;
        Self::new(db, publisher, artifacts, all_adapters()?, salt)
    }

    #[must_use]
    pub fn gate(&self) -> &GateController {
        &self.gate
    }

    #[must_use]
    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    fn destination(&self) -> Option<String> {
        self.publisher.as_ref().map(|p| p.name().to_string())
    }

    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        let destination = self.destination();
        let retry = destination
            .as_deref()
            .map(|d| self.state.retry_for(d))
            .unwrap_or_default();
        DaemonStatus {
            paused: self.state.paused,
            pending: self.state.pending.len(),
            push_threshold: self.settings.push_threshold,
            auto_push: self.settings.auto_push,
            destination,
            retry_attempts: retry.attempts,
            next_retry_at: retry.next_attempt_at,
            halted: retry.halted,
            last_sync_at: self.state.last_sync_at,
            last_error: self.state.last_error.clone(),
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Some(Utc::now());
        self.db.replace_daemon_state(&self.state)
    }

    /// A queue left over from a previous run is retried as if its last
    /// attempt had just failed.
    fn recover(&mut self) {
        let Some(destination) = self.destination() else {
            return;
        };
        let pending = self.state.pending.len();
        if pending == 0 {
            return;
        }
        let threshold = self.settings.push_threshold;
        let delay = {
            let retry = self.state.retry_for(&destination);
            if retry.halted || (retry.attempts == 0 && pending < threshold) {
                return;
            }
            backoff_delay(&self.settings.backoff_tiers_secs, retry.attempts.max(1))
        };
        let retry = self.state.retries.entry(destination).or_default();
        retry.next_attempt_at = Some(deadline(delay));
        log::info!(
            "Recovered {pending} pending sessions, next push attempt in {}s",
            delay.as_secs()
        );
    }

    fn reload_settings(&mut self) -> Result<()> {
        self.settings = self.db.get_settings()?;
        Ok(())
    }

    fn scoped_adapters(&self, scope: &BTreeSet<String>) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|a| scope.contains(a.name()))
            .cloned()
            .collect()
    }

    /// Directories to watch for the current source scope
    ///
    /// # Errors
    ///
    /// Returns an error if the gate state cannot be loaded
    pub fn watch_roots(&self) -> Result<Vec<PathBuf>> {
        let scope = self.gate.state()?.source_scope;
        Ok(self
            .scoped_adapters(&scope)
            .iter()
            .flat_map(|a| a.roots())
            .filter(|root| root.is_dir())
            .collect())
    }

    /// Discover, redact and queue every new or changed session. Returns how
    /// many sessions were processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline fails or an artifact cannot be written
    pub async fn scan(&mut self) -> Result<usize> {
        if self.state.paused {
            return Ok(0);
        }
        let gate_state = self.gate.state()?;
        let adapters = self.scoped_adapters(&gate_state.source_scope);
        let (sessions, errors) = tokio::task::spawn_blocking(move || load_sessions(&adapters))
            .await
            .context("Source scan panicked")?;

        let live: BTreeSet<String> = sessions
            .iter()
            .map(|s| s.session_id.clone())
            .chain(errors.iter().map(|e| reject_key(e.path())))
            .collect();
        let pruned = self.state.prune_seen(&live);
        if pruned > 0 {
            log::debug!("Forgot {pruned} sessions whose files are gone");
        }

        for error in errors {
            let key = reject_key(error.path());
            if self.state.seen.contains_key(&key) {
                continue;
            }
            log::warn!("{error}");
            self.snapshotter.artifacts().append_reject(&RejectRecord::new(
                error.path().display().to_string(),
                error.to_string(),
            ))?;
            self.state.seen.insert(key, "rejected".to_string());
        }

        let mut fresh = Vec::new();
        let mut digests = Vec::new();
        for session in sessions {
            let digest = session.digest()?;
            if self.state.seen.get(&session.session_id) == Some(&digest) {
                continue;
            }
            digests.push((session.session_id.clone(), digest));
            fresh.push(session);
        }
        if fresh.is_empty() {
            if pruned > 0 {
                self.persist()?;
            }
            return Ok(0);
        }

        let rules = RedactionRules::for_machine(
            self.salt.clone(),
            &gate_state.redact_usernames,
            &gate_state.redact_strings,
        );
        let engine = RedactionEngine::new(rules, self.settings.quarantine_threshold)?;
        let pipeline = Pipeline::new(engine, self.settings.worker_count);
        let processed = pipeline.process(fresh).await?;

        let admitted = self
            .snapshotter
            .admit(processed, &ProjectFilter::from_state(&gate_state))?;
        let admitted_ids: BTreeSet<&str> =
            admitted.records.iter().map(|r| r.session_id.as_str()).collect();
        // An older copy must not be pushed once the new version is held back
        for (id, _) in &digests {
            if !admitted_ids.contains(id.as_str()) {
                self.state.pending.retain(|r| &r.session_id != id);
            }
        }
        let queued = admitted.records.len();
        for record in admitted.records {
            self.state.enqueue(record);
        }
        let total = digests.len();
        self.state.seen.extend(digests);
        self.state.batch_quarantined += admitted.quarantined;
        self.persist()?;

        log::info!(
            "Scan: {total} new or changed sessions, {queued} queued, {} quarantined, {} excluded, {} pending",
            admitted.quarantined,
            admitted.excluded,
            self.state.pending.len()
        );
        Ok(total)
    }

    fn record_failure(&mut self, destination: &str, error: &PublishError) {
        let tiers = self.settings.backoff_tiers_secs.clone();
        let retry = self.state.retries.entry(destination.to_string()).or_default();
        retry.attempts = retry.attempts.saturating_add(1);
        retry.last_error = Some(error.message().to_string());
        if error.is_retryable() {
            let delay = backoff_delay(&tiers, retry.attempts);
            retry.next_attempt_at = Some(deadline(delay));
            log::warn!(
                "Push to {destination} failed (attempt {}), retrying in {}s: {error}",
                retry.attempts,
                delay.as_secs()
            );
        } else {
            retry.halted = true;
            retry.next_attempt_at = None;
            log::error!("Push to {destination} failed permanently, automatic pushes halted: {error}");
        }
        self.state.last_error = Some(error.to_string());
    }

    /// Push the pending queue if it is due. `force` ignores the threshold,
    /// the retry timer and a halted destination. Returns whether a push
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot or state cannot be persisted
    pub async fn push_pending(&mut self, force: bool) -> Result<bool> {
        if self.state.paused || self.state.pending.is_empty() {
            return Ok(false);
        }
        if !self.settings.auto_push {
            log::debug!("Automatic push disabled, {} sessions pending", self.state.pending.len());
            return Ok(false);
        }
        let Some(publisher) = self.publisher.clone() else {
            self.state.last_error = Some("No publisher configured".to_string());
            return Ok(false);
        };
        let destination = publisher.name().to_string();
        let retry = self.state.retry_for(&destination);
        if !force {
            if retry.halted || retry.is_waiting(Utc::now()) {
                return Ok(false);
            }
            if retry.attempts == 0 && self.state.pending.len() < self.settings.push_threshold {
                return Ok(false);
            }
        }

        let batch = self.state.pending.clone();
        let snapshot = self
            .snapshotter
            .batch_from_records(batch.clone(), self.state.batch_quarantined)?;
        // A retry of the same batch is not a new export
        if self.state.recorded_batch.as_deref() != Some(snapshot.fingerprint.as_str()) {
            self.gate.record_export(&snapshot.fingerprint)?;
            self.state.recorded_batch = Some(snapshot.fingerprint.clone());
            self.persist()?;
        }

        let outcome = self
            .gate
            .publish(&*publisher, &snapshot, &PublishRequest::Automatic)
            .await;
        let pushed = match outcome {
            Ok(receipt) => {
                let removed = self.state.remove_pushed(&batch);
                self.state.retries.remove(&destination);
                self.state.recorded_batch = None;
                self.state.batch_quarantined = 0;
                self.state.last_sync_at = Some(Utc::now());
                self.state.last_error = None;
                log::info!(
                    "Pushed {removed} sessions as {} to {}",
                    snapshot.short_fingerprint(),
                    receipt.destination
                );
                true
            }
            Err(GateFailure::Publish(error)) => {
                self.record_failure(&destination, &error);
                false
            }
            Err(GateFailure::Gate(GateError::PushInProgress)) => {
                let tiers = self.settings.backoff_tiers_secs.clone();
                let retry = self.state.retries.entry(destination.clone()).or_default();
                let delay = backoff_delay(&tiers, retry.attempts.max(1));
                retry.next_attempt_at = Some(deadline(delay));
                log::info!("Another push is in flight, trying again in {}s", delay.as_secs());
                false
            }
            Err(GateFailure::Gate(error)) => {
                log::warn!("Automatic push refused by the gate: {error}");
                if let Some(retry) = self.state.retries.get_mut(&destination) {
                    retry.next_attempt_at = None;
                }
                self.state.last_error = Some(error.to_string());
                false
            }
            Err(GateFailure::Storage(error)) => return Err(error),
        };
        self.persist()?;
        Ok(pushed)
    }

    /// Scan then push if due
    ///
    /// # Errors
    ///
    /// Returns the first scan or push error
    pub async fn sync(&mut self, force: bool) -> Result<()> {
        self.scan().await?;
        self.push_pending(force).await?;
        Ok(())
    }

    async fn sync_logged(&mut self, force: bool) {
        if let Err(e) = self.sync(force).await {
            log::error!("Sync failed: {e:#}");
            self.state.last_error = Some(format!("{e:#}"));
        }
    }

    fn clear_halt(&mut self) {
        if let Some(destination) = self.destination() {
            if let Some(retry) = self.state.retries.get_mut(&destination) {
                retry.halted = false;
                retry.next_attempt_at = None;
            }
        }
    }

    /// Apply one control request. The flag is true when the daemon should stop.
    pub async fn handle_control(&mut self, request: IpcRequest) -> (IpcResponse, bool) {
        let result = match request {
            IpcRequest::Status => return (IpcResponse::Status(self.status()), false),
            IpcRequest::Shutdown => {
                return (IpcResponse::Ack("Daemon shutting down".to_string()), true)
            }
            IpcRequest::Pause => {
                self.state.paused = true;
                self.persist().map(|()| {
                    log::info!("Paused with {} sessions pending", self.state.pending.len());
                    format!("Paused; {} sessions stay queued", self.state.pending.len())
                })
            }
            IpcRequest::Resume => self.resume().await,
            IpcRequest::ForceSync => {
                self.clear_halt();
                self.sync(true).await.map(|()| {
                    format!("Sync finished; {} sessions pending", self.state.pending.len())
                })
            }
        };
        match result {
            Ok(message) => (IpcResponse::Ack(message), false),
            Err(e) => (IpcResponse::Error(format!("{e:#}")), false),
        }
    }

    async fn resume(&mut self) -> Result<String> {
        self.state = self.db.load_daemon_state()?;
        self.state.paused = false;
        self.state.running = true;
        self.reload_settings()?;
        self.persist()?;
        self.recover();
        self.sync(false).await?;
        log::info!("Resumed");
        Ok(format!("Resumed; {} sessions pending", self.state.pending.len()))
    }

    fn retry_delay(&self) -> Option<Duration> {
        if self.state.paused || !self.settings.auto_push || self.state.pending.is_empty() {
            return None;
        }
        let retry = self.state.retry_for(&self.destination()?);
        if retry.halted {
            return None;
        }
        let at = retry.next_attempt_at?;
        Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Coordinating loop. Filesystem changes, ticks, retry deadlines and
    /// control requests are handled one at a time, so each sees the state
    /// the previous one left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon state cannot be persisted
    pub async fn run(
        &mut self,
        mut changes: mpsc::Receiver<()>,
        mut control: mpsc::Receiver<ControlMessage>,
    ) -> Result<()> {
        let mut tick = interval(Duration::from_secs(self.settings.watch_interval_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.state.running = true;
        self.persist()?;
        log::info!(
            "Daemon started: {} pending, push threshold {}",
            self.state.pending.len(),
            self.settings.push_threshold
        );

        loop {
            let retry_in = self.retry_delay();
            tokio::select! {
                Some(()) = changes.recv() => {
                    if !self.state.paused {
                        log::debug!("Session files changed");
                        self.sync_logged(false).await;
                    }
                }
                _ = tick.tick() => {
                    if !self.state.paused {
                        if let Err(e) = self.reload_settings() {
                            log::warn!("Failed to reload settings: {e}");
                        }
                        self.sync_logged(false).await;
                    }
                }
                () = sleep(retry_in.unwrap_or(IDLE)), if retry_in.is_some() => {
                    if let Err(e) = self.push_pending(false).await {
                        log::error!("Retry failed: {e:#}");
                    }
                }
                Some(message) = control.recv() => {
                    let (response, stop) = self.handle_control(message.request).await;
                    let _ = message.reply.send(response);
                    if stop {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    break;
                }
            }
        }

        self.state.running = false;
        self.persist()?;
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    /// Run with the IPC socket and filesystem watcher attached
    ///
    /// # Errors
    ///
    /// Returns an error if the loop fails
    pub async fn serve(mut self, paths: &Paths) -> Result<()> {
        let (control_tx, control_rx) = mpsc::channel(16);
        let sock_path = paths.socket();
        let handler = DaemonIpcHandler::new(control_tx);
        tokio::spawn(async move {
            if let Err(e) = listen(handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let (change_tx, change_rx) = mpsc::channel(4);
        let _watch = spawn_watcher(
            self.watch_roots()?,
            Duration::from_millis(self.settings.debounce_millis),
            change_tx,
        );

        let result = self.run(change_rx, control_rx).await;
        let _ = std::fs::remove_file(paths.socket());
        result
    }
}
