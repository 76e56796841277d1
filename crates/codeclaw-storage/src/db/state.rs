use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Database;

fn read_state<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|json| {
        serde_json::from_str(&json).with_context(|| format!("Corrupt state document: {key}"))
    })
    .transpose()
}

fn write_state<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO state (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
         value = excluded.value,
         updated_at = excluded.updated_at",
        params![key, json, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl Database {
    /// Load a JSON state document by key
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored document is not valid JSON
    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        read_state(&*self.conn()?, key)
    }

    /// Replace a JSON state document. The write is a single statement, so
    /// readers observe either the previous or the new document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database write fails
    pub fn put_state<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        write_state(&*self.conn()?, key, value)?;
        log::debug!("State document {key} saved");
        Ok(())
    }

    /// Read-modify-write a state document inside one `BEGIN IMMEDIATE`
    /// transaction, so a second process holding the same file cannot
    /// interleave its own update. `update` returning `None` leaves the
    /// document untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction, the read, or the write fails
    pub fn update_state<T, F>(&self, key: &str, update: F) -> Result<Option<T>>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(T) -> Option<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: T = read_state(&tx, key)?.unwrap_or_default();
        let Some(next) = update(current) else {
            return Ok(None);
        };
        write_state(&tx, key, &next)?;
        tx.commit()?;
        log::debug!("State document {key} updated");
        Ok(Some(next))
    }
}
