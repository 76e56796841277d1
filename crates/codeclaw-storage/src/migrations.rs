use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if database table creation or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Settings table - pipeline and daemon tunables, single row
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            push_threshold INTEGER NOT NULL,
            backoff_tiers TEXT NOT NULL,
            quarantine_threshold INTEGER NOT NULL,
            watch_interval_secs INTEGER NOT NULL,
            debounce_millis INTEGER NOT NULL,
            max_tool_input_chars INTEGER NOT NULL,
            worker_count INTEGER NOT NULL,
            auto_push INTEGER DEFAULT 0,
            encrypt_artifacts INTEGER DEFAULT 1
        )",
        [],
    )?;

    add_missing_columns(
        conn,
        "settings",
        &[
            ("auto_push", "INTEGER DEFAULT 0"),
            ("encrypt_artifacts", "INTEGER DEFAULT 1"),
        ],
    )?;

    // Publisher configuration - dataset host credentials, single row
    conn.execute(
        "CREATE TABLE IF NOT EXISTS publisher_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            endpoint TEXT NOT NULL,
            repo TEXT NOT NULL,
            api_key TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // State documents - gate and daemon state stored as JSON
    conn.execute(
        "CREATE TABLE IF NOT EXISTS state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Push history
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pushes (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            kind TEXT NOT NULL,
            destination TEXT NOT NULL,
            sessions INTEGER NOT NULL,
            pushed_at TEXT NOT NULL
        )",
        [],
    )?;

    // Leases - named locks shared by every process that opens the database
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leases (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pushes_pushed_at ON pushes(pushed_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pushes_fingerprint ON pushes(fingerprint)",
        [],
    )?;

    log::debug!("Database schema initialized");
    Ok(())
}

/// Add columns introduced after a table was first created
fn add_missing_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    for (column_name, column_type) in columns {
        let count: i32 = conn.query_row(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name='{column_name}'"),
            [],
            |row| row.get(0),
        )?;

        if count == 0 {
            conn.execute(
                &format!("ALTER TABLE {table} ADD COLUMN {column_name} {column_type}"),
                [],
            )?;
            log::info!("Added column {column_name} to {table}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
                 AND name IN ('settings', 'publisher_config', 'state', 'pushes', 'leases')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }
}
