use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::helpers::parse_datetime;
use super::Database;

impl Database {
    /// Claim the named lease for `holder` until `ttl` from now.
    ///
    /// Succeeds when the lease is free, expired, or already held by
    /// `holder`. The check and the claim run in one `BEGIN IMMEDIATE`
    /// transaction, so two processes sharing the file never both win.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or committed
    pub fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT holder, expires_at FROM leases WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((owner, expires_at)) = current {
            // An unreadable expiry counts as expired
            let live = parse_datetime(&expires_at).is_ok_and(|at| at > now);
            if owner != holder && live {
                return Ok(false);
            }
            if owner != holder {
                log::warn!("Taking over expired lease {name} from {owner}");
            }
        }

        tx.execute(
            "INSERT INTO leases (name, holder, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
             holder = excluded.holder,
             expires_at = excluded.expires_at",
            params![name, holder, (now + ttl).to_rfc3339()],
        )?;
        tx.commit()?;
        log::debug!("Lease {name} held by {holder}");
        Ok(true)
    }

    /// Give the lease back. Returns false when `holder` no longer held it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database delete fails
    pub fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(removed > 0)
    }
}
