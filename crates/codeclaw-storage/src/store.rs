use anyhow::Result;
use chrono::{Duration, Utc};

use crate::db::Database;
use crate::models::{DaemonState, GateState, PushRecord};

const GATE_STATE_KEY: &str = "gate";
const DAEMON_STATE_KEY: &str = "daemon";
const PUSH_LEASE: &str = "push";

/// Durable home of the gate and daemon state documents.
///
/// Every `replace_*` call swaps the whole document at once. Gate changes go
/// through [`StateStore::update_gate_state`], which is atomic across every
/// process sharing the store.
pub trait StateStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read
    fn load_gate_state(&self) -> Result<GateState>;

    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn replace_gate_state(&self, state: &GateState) -> Result<()>;

    /// Atomically read, transform and write the gate state. `update`
    /// returning `None` aborts without writing; the result is then `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read or written
    fn update_gate_state(
        &self,
        update: &mut dyn FnMut(&GateState) -> Option<GateState>,
    ) -> Result<Option<GateState>>;

    /// Claim the store-wide push lease. Returns false while another holder
    /// has an unexpired claim.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be read or written
    fn try_acquire_push_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// # Errors
    ///
    /// Returns an error if the lease cannot be released
    fn release_push_lease(&self, holder: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read
    fn load_daemon_state(&self) -> Result<DaemonState>;

    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn replace_daemon_state(&self, state: &DaemonState) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the push history cannot be written
    fn record_push(&self, push: &PushRecord) -> Result<()>;
}

impl StateStore for Database {
    fn load_gate_state(&self) -> Result<GateState> {
        Ok(self.get_state(GATE_STATE_KEY)?.unwrap_or_default())
    }

    fn replace_gate_state(&self, state: &GateState) -> Result<()> {
        let mut state = state.clone();
        state.updated_at = Some(Utc::now());
        self.put_state(GATE_STATE_KEY, &state)
    }

    fn update_gate_state(
        &self,
        update: &mut dyn FnMut(&GateState) -> Option<GateState>,
    ) -> Result<Option<GateState>> {
        self.update_state(GATE_STATE_KEY, |current: GateState| {
            update(&current).map(|mut next| {
                next.updated_at = Some(Utc::now());
                next
            })
        })
    }

    fn try_acquire_push_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        self.try_acquire_lease(PUSH_LEASE, holder, ttl)
    }

    fn release_push_lease(&self, holder: &str) -> Result<()> {
        if !self.release_lease(PUSH_LEASE, holder)? {
            log::warn!("Push lease for {holder} had already been taken over");
        }
        Ok(())
    }

    fn load_daemon_state(&self) -> Result<DaemonState> {
        Ok(self.get_state(DAEMON_STATE_KEY)?.unwrap_or_default())
    }

    fn replace_daemon_state(&self, state: &DaemonState) -> Result<()> {
        let mut state = state.clone();
        state.updated_at = Some(Utc::now());
        self.put_state(DAEMON_STATE_KEY, &state)
    }

    fn record_push(&self, push: &PushRecord) -> Result<()> {
        self.insert_push(push)
    }
}
