//! DDL and pragmas for the embedded store (spec §4.E, §6.1).

use rusqlite::Connection;

use crate::Error;

const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Bound on how long a single store operation waits on lock contention
/// before returning `SQLITE_BUSY` (spec §5: "store operations bound to
/// 5s").
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Applies the WAL journaling and performance pragmas the store requires.
/// Run once per connection, immediately after `open`.
pub(crate) fn apply_pragmas(conn: &Connection, wal_checkpoint_interval: u32) -> Result<(), Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    // ~64 MiB page cache, negative value means kibibytes per the sqlite docs.
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", wal_checkpoint_interval)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS.into()))?;
    Ok(())
}

/// Creates the schema if absent: `samples`, `events`, `models`, and a
/// single-row `schema_meta` table tracking a schema version independent
/// of any individual model's version (spec §4.J).
pub(crate) fn migrate(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS samples (
            ts INTEGER NOT NULL,
            host TEXT NOT NULL,
            cpu_pct REAL NOT NULL,
            mem_pct REAL NOT NULL,
            disk_read_bps REAL NOT NULL,
            disk_write_bps REAL NOT NULL,
            net_up_bps REAL NOT NULL,
            net_down_bps REAL NOT NULL,
            swap_pct REAL NOT NULL,
            proc_count INTEGER NOT NULL,
            cpu_temp REAL,
            PRIMARY KEY (host, ts)
        );
        CREATE INDEX IF NOT EXISTS idx_samples_ts ON samples (ts);
        CREATE INDEX IF NOT EXISTS idx_samples_host_ts ON samples (host, ts);

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            type TEXT NOT NULL,
            score REAL,
            metric_tags TEXT NOT NULL,
            explanation TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_ts ON events (ts);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events (type);

        CREATE TABLE IF NOT EXISTS models (
            name TEXT PRIMARY KEY,
            algo TEXT NOT NULL,
            version TEXT NOT NULL,
            trained_at INTEGER NOT NULL,
            meta TEXT NOT NULL,
            blob BLOB NOT NULL
        );",
    )?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_meta WHERE id = 0", [], |row| row.get(0))
        .ok();
    if version.is_none() {
        let _ = conn.execute(
            "INSERT INTO schema_meta (id, version) VALUES (0, ?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

pub(crate) fn schema_version(conn: &Connection) -> Result<u32, Error> {
    let version = conn.query_row("SELECT version FROM schema_meta WHERE id = 0", [], |row| row.get(0))?;
    Ok(version)
}
