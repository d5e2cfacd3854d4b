use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

pub const KEY_ACTIVE_QUEUE: &str = "activeQueue";
pub const KEY_BATCH_SETTINGS: &str = "batchSettings";
pub const KEY_TOTAL_IN_BATCH: &str = "totalInBatch";
pub const KEY_IS_PAUSED: &str = "isPaused";
pub const PREFERENCE_PREFIX: &str = "saved_";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key             TEXT PRIMARY KEY,
    value_json      TEXT NOT NULL,
    updated_at      DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Open (or create) the state database. Pass `None` for an in-memory database.
pub fn open_database(path: Option<&std::path::Path>) -> Result<Connection> {
    let conn = match path {
        Some(p) => Connection::open(p).context("Failed to open state database")?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Failed to set PRAGMA options")?;

    conn.execute_batch(SCHEMA)
        .context("Failed to create state schema")?;

    Ok(conn)
}

/// Insert or replace a value.
pub fn put_value(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO kv_store (key, value_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json,
                                        updated_at = excluded.updated_at",
        params![key, serde_json::to_string(value)?, now],
    )
    .with_context(|| format!("Failed to store '{}'", key))?;
    Ok(())
}

/// Read a value, `None` if the key was never written or was deleted.
pub fn get_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read '{}'", key))?;

    match raw {
        Some(json) => Ok(Some(
            serde_json::from_str(&json).with_context(|| format!("Corrupt JSON under '{}'", key))?,
        )),
        None => Ok(None),
    }
}

/// Delete a key. Returns whether it existed.
pub fn delete_value(conn: &Connection, key: &str) -> Result<bool> {
    let count = conn
        .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
        .with_context(|| format!("Failed to delete '{}'", key))?;
    Ok(count > 0)
}

/// List `(key, value)` pairs whose key starts with `prefix`, ordered by key.
pub fn list_prefixed(conn: &Connection, prefix: &str) -> Result<Vec<(String, Value)>> {
    let mut stmt = conn
        .prepare(
            "SELECT key, value_json FROM kv_store
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key ASC",
        )
        .context("Failed to prepare list_prefixed query")?;

    let rows = stmt
        .query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to execute list_prefixed query")?;

    let mut entries = Vec::new();
    for row in rows {
        let (key, json) = row.context("Failed to read kv row")?;
        let value = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt JSON under '{}'", key))?;
        entries.push((key, value));
    }
    Ok(entries)
}
