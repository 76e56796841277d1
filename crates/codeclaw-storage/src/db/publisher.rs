use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use crate::models::PublisherConfig;

use super::helpers::parse_datetime;
use super::Database;

impl Database {
    /// Get the dataset host configuration, if one was saved
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_publisher_config(&self) -> Result<Option<PublisherConfig>> {
        let result = self
            .conn()?
            .query_row(
                "SELECT endpoint, repo, api_key, updated_at FROM publisher_config WHERE id = 1",
                [],
                |row| {
                    Ok(PublisherConfig {
                        endpoint: row.get(0)?,
                        repo: row.get(1)?,
                        api_key: row.get(2)?,
                        updated_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// Upsert the dataset host configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub fn upsert_publisher_config(&self, config: &PublisherConfig) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO publisher_config (id, endpoint, repo, api_key, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
             endpoint = excluded.endpoint,
             repo = excluded.repo,
             api_key = excluded.api_key,
             updated_at = excluded.updated_at",
            params![
                config.endpoint,
                config.repo,
                config.api_key,
                config.updated_at.to_rfc3339(),
            ],
        )?;
        log::info!("Publisher configured for {} ({})", config.repo, config.endpoint);
        Ok(())
    }
}
