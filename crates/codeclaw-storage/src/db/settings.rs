use anyhow::{bail, Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::models::Settings;

use super::helpers::{parse_count, to_sql_count};
use super::Database;

/// Keys accepted by [`Database::update_setting`]
pub const SETTING_KEYS: [&str; 9] = [
    "push_threshold",
    "backoff_tiers",
    "quarantine_threshold",
    "watch_interval_secs",
    "debounce_millis",
    "max_tool_input_chars",
    "worker_count",
    "auto_push",
    "encrypt_artifacts",
];

impl Database {
    /// Get or create settings
    ///
    /// # Errors
    ///
    /// Returns an error if the database query or insert operation fails
    pub fn get_settings(&self) -> Result<Settings> {
        let result: Option<Settings> = self
            .conn()?
            .query_row(
                "SELECT push_threshold, backoff_tiers, quarantine_threshold, watch_interval_secs,
                        debounce_millis, max_tool_input_chars, worker_count, auto_push,
                        encrypt_artifacts
                 FROM settings WHERE id = 1",
                [],
                |row| {
                    let backoff_json: String = row.get(1)?;
                    let backoff_tiers_secs: Vec<u64> = serde_json::from_str(&backoff_json)
                        .unwrap_or_else(|_| Settings::default_settings().backoff_tiers_secs);

                    Ok(Settings {
                        push_threshold: parse_count(row.get(0)?)?,
                        backoff_tiers_secs,
                        quarantine_threshold: parse_count(row.get(2)?)?,
                        watch_interval_secs: parse_count(row.get(3)?)?,
                        debounce_millis: parse_count(row.get(4)?)?,
                        max_tool_input_chars: parse_count(row.get(5)?)?,
                        worker_count: parse_count(row.get(6)?)?,
                        auto_push: row.get::<_, Option<i32>>(7)?.unwrap_or(0) != 0,
                        encrypt_artifacts: row.get::<_, Option<i32>>(8)?.unwrap_or(1) != 0,
                    })
                },
            )
            .optional()?;

        if let Some(settings) = result {
            Ok(settings)
        } else {
            // Create default settings
            let settings = Settings::default_settings();
            self.update_settings(&settings)?;
            Ok(settings)
        }
    }

    /// Update settings
    ///
    /// # Errors
    ///
    /// Returns an error if the database update operation or JSON serialization fails
    pub fn update_settings(&self, settings: &Settings) -> Result<()> {
        let backoff_json = serde_json::to_string(&settings.backoff_tiers_secs)?;

        self.conn()?.execute(
            "INSERT INTO settings (id, push_threshold, backoff_tiers, quarantine_threshold,
                                   watch_interval_secs, debounce_millis, max_tool_input_chars,
                                   worker_count, auto_push, encrypt_artifacts)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                push_threshold = ?1,
                backoff_tiers = ?2,
                quarantine_threshold = ?3,
                watch_interval_secs = ?4,
                debounce_millis = ?5,
                max_tool_input_chars = ?6,
                worker_count = ?7,
                auto_push = ?8,
                encrypt_artifacts = ?9",
            params![
                to_sql_count(settings.push_threshold),
                backoff_json,
                to_sql_count(settings.quarantine_threshold),
                to_sql_count(settings.watch_interval_secs),
                to_sql_count(settings.debounce_millis),
                to_sql_count(settings.max_tool_input_chars),
                to_sql_count(settings.worker_count),
                i32::from(settings.auto_push),
                i32::from(settings.encrypt_artifacts),
            ],
        )?;
        Ok(())
    }

    /// Update a single setting from its textual form, as given on the command line
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys, unparsable values or a failed write
    pub fn update_setting(&self, key: &str, value: &str) -> Result<Settings> {
        let mut settings = self.get_settings()?;

        match key {
            "push_threshold" => settings.push_threshold = parse_positive(key, value)?,
            "quarantine_threshold" => {
                settings.quarantine_threshold = value
                    .parse()
                    .with_context(|| format!("Invalid value for {key}: {value}"))?;
            }
            "watch_interval_secs" => settings.watch_interval_secs = parse_positive(key, value)?,
            "debounce_millis" => {
                settings.debounce_millis = value
                    .parse()
                    .with_context(|| format!("Invalid value for {key}: {value}"))?;
            }
            "max_tool_input_chars" => settings.max_tool_input_chars = parse_positive(key, value)?,
            "worker_count" => settings.worker_count = parse_positive(key, value)?,
            "auto_push" => settings.auto_push = parse_flag(key, value)?,
            "encrypt_artifacts" => settings.encrypt_artifacts = parse_flag(key, value)?,
            "backoff_tiers" => {
                let tiers = value
                    .split(',')
                    .map(|part| parse_positive::<u64>(key, part.trim()))
                    .collect::<Result<Vec<_>>>()?;
                if tiers.is_empty() {
                    bail!("backoff_tiers needs at least one tier");
                }
                settings.backoff_tiers_secs = tiers;
            }
            _ => bail!(
                "Unknown setting: {key}. Valid keys: {}",
                SETTING_KEYS.join(", ")
            ),
        }

        self.update_settings(&settings)?;
        log::info!("Setting {key} updated to {value}");
        Ok(settings)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => bail!("Invalid value for {key}: {value} (expected true/false)"),
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed: T = value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {key}: {value}"))?;
    if parsed <= T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(parsed)
}
