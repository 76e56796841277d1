use anyhow::Result;
use rusqlite::params;

use crate::models::{PushKind, PushRecord};

use super::helpers::{parse_count, parse_datetime, to_sql_count};
use super::Database;

impl Database {
    /// Append a push to the history
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails
    pub fn insert_push(&self, push: &PushRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO pushes (id, fingerprint, kind, destination, sessions, pushed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                push.fingerprint,
                push.kind.to_string(),
                push.destination,
                to_sql_count(push.sessions),
                push.pushed_at.to_rfc3339(),
            ],
        )?;
        log::debug!(
            "Recorded {} push of {} to {}",
            push.kind,
            push.fingerprint,
            push.destination
        );
        Ok(())
    }

    /// Most recent pushes, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_recent_pushes(&self, limit: usize) -> Result<Vec<PushRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fingerprint, kind, destination, sessions, pushed_at
             FROM pushes
             ORDER BY pushed_at DESC
             LIMIT ?1",
        )?;

        let pushes = stmt
            .query_map(params![to_sql_count(limit)], |row| {
                let kind = match row.get::<_, String>(1)?.as_str() {
                    "automatic" => PushKind::Automatic,
                    _ => PushKind::Manual,
                };
                Ok(PushRecord {
                    fingerprint: row.get(0)?,
                    kind,
                    destination: row.get(2)?,
                    sessions: parse_count(row.get(3)?)?,
                    pushed_at: parse_datetime(&row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pushes)
    }
}
