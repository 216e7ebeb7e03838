#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The embedded relational store (spec §4.E, §4.J, §6.1, §6.5): schema,
//! WAL journaling and pragmas, sample/event/model reads and writes, and
//! retention pruning. Built on `rusqlite` with the `bundled` feature so
//! the agent stays self-contained and fully offline (spec §1).

mod export;
mod models;
mod retention;
mod samples;
mod schema;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

pub use models::ModelVersionError;
use rusqlite::{Connection, OpenFlags};
pub use samples::LatestSample;
use sysmon_types::{Event, ModelRecord, Sample};

static MEMORY_STORE_SEQ: AtomicU64 = AtomicU64::new(0);

/// All the errors that can occur while using the store (spec §7).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A transient failure (lock contention, a momentary I/O hiccup).
    /// Retryable by the caller (the batch writer retries locally).
    #[error("store busy: {reason}")]
    Busy {
        /// Underlying reason, as reported by the database engine.
        reason: String,
    },

    /// A persistent failure. Surfaced to the caller; the agent continues
    /// running but the operation that hit this error is abandoned.
    #[error("store fatal error: {reason}")]
    Fatal {
        /// Underlying reason, as reported by the database engine.
        reason: String,
    },

    /// A `ModelRecord`'s major version does not match what this binary
    /// supports.
    #[error(transparent)]
    ModelVersion(#[from] ModelVersionError),

    /// A stored row holds a value this binary does not recognise (e.g. an
    /// `algo` column written by a newer or differently-built binary).
    #[error("corrupt store row: {reason}")]
    Corrupt {
        /// Human-readable description of the unrecognised value.
        reason: String,
    },
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Error::Busy { reason: err.to_string() }
            }
            _ => Error::Fatal { reason: err.to_string() },
        }
    }
}

/// The embedded store. Cheap to clone (two `Arc`s, each around its own
/// connection, each guarded by its own mutex) so every thread described in
/// spec §5 (writer, maintenance, readers) can hold its own handle. Writes
/// go through a dedicated connection; reads go through a second,
/// independent connection, so a long-running read never waits on the
/// writer's lock and vice versa, matching WAL mode's concurrent-readers-
/// during-a-write guarantee (spec §4.E, §5).
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    wal_checkpoint_interval: u32,
}

impl Store {
    /// Opens (creating if absent) the store file at `path`, applies the
    /// schema and the required pragmas (spec §4.E): WAL journaling,
    /// `synchronous=NORMAL`, in-memory temp store, a page cache sized for
    /// roughly 64 MiB, and the given WAL auto-checkpoint interval. Opens a
    /// second connection against the same file for reads.
    pub fn open(path: impl AsRef<Path>, wal_checkpoint_interval: u32) -> Result<Self, Error> {
        let path = path.as_ref();
        let writer = Connection::open(path)?;
        schema::apply_pragmas(&writer, wal_checkpoint_interval)?;
        schema::migrate(&writer)?;

        let reader = Connection::open(path)?;
        schema::apply_pragmas(&reader, wal_checkpoint_interval)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            wal_checkpoint_interval,
        })
    }

    /// Opens a private, in-memory store. Used by tests and by short-lived
    /// tooling; never shared across processes. The reader and writer
    /// connections share a process-local, uniquely-named in-memory
    /// database via SQLite's shared-cache mode, so this still exercises
    /// the same two-connection split as `open`.
    pub fn open_in_memory() -> Result<Self, Error> {
        let id = MEMORY_STORE_SEQ.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:sysmon-store-{id}?mode=memory&cache=shared");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI;

        let writer = Connection::open_with_flags(&uri, flags)?;
        schema::apply_pragmas(&writer, 1000)?;
        schema::migrate(&writer)?;

        let reader = Connection::open_with_flags(&uri, flags)?;
        schema::apply_pragmas(&reader, 1000)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            wal_checkpoint_interval: 1000,
        })
    }

    /// The schema version currently recorded in the store.
    pub fn schema_version(&self) -> Result<u32, Error> {
        let conn = self.lock_reader();
        schema::schema_version(&conn)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_reader(&self) -> MutexGuard<'_, Connection> {
        self.reader.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Inserts a batch of samples in a single transaction (spec §4.D).
    /// Returns the number of rows actually inserted (rows that collide on
    /// `(host, ts)` are silently ignored per the "no two Sample rows share
    /// `(host, ts)`" invariant — the writer treats this as success, not a
    /// retry case).
    pub fn insert_samples(&self, samples: &[Sample]) -> Result<usize, Error> {
        let mut conn = self.lock_writer();
        samples::insert_batch(&mut conn, samples)
    }

    /// Reads all samples for `host` with `ts` in `[ts_from, ts_to]`,
    /// inclusive, ascending by `ts` (spec §4.E, invariant 1).
    pub fn read_window(&self, host: &str, ts_from: i64, ts_to: i64) -> Result<Vec<Sample>, Error> {
        let conn = self.lock_reader();
        samples::read_window(&conn, host, ts_from, ts_to)
    }

    /// Total number of samples currently stored for `host`.
    pub fn count(&self, host: &str) -> Result<u64, Error> {
        let conn = self.lock_reader();
        samples::count(&conn, host)
    }

    /// The `n` most recent samples for `host`, ascending by `ts`.
    pub fn latest_n(&self, host: &str, n: usize) -> Result<Vec<Sample>, Error> {
        let conn = self.lock_reader();
        samples::latest_n(&conn, host, n)
    }

    /// The single most recent sample per distinct host.
    pub fn latest_per_host(&self) -> Result<Vec<LatestSample>, Error> {
        let conn = self.lock_reader();
        samples::latest_per_host(&conn)
    }

    /// Inserts an event, returning its assigned `id`.
    pub fn insert_event(&self, event: &Event) -> Result<i64, Error> {
        let conn = self.lock_writer();
        retention::insert_event(&conn, event)
    }

    /// Reads events with `ts` in `[ts_from, ts_to]`, optionally filtered
    /// by type, ascending by `ts`.
    pub fn read_events(
        &self,
        ts_from: i64,
        ts_to: i64,
        event_type: Option<sysmon_types::EventType>,
    ) -> Result<Vec<Event>, Error> {
        let conn = self.lock_reader();
        retention::read_events(&conn, ts_from, ts_to, event_type)
    }

    /// Atomically writes (insert-or-replace) a model record (spec §4.J).
    pub fn put_model(&self, record: &ModelRecord) -> Result<(), Error> {
        let conn = self.lock_writer();
        models::put_model(&conn, record)
    }

    /// Reads a model record by name. Rejects (with
    /// `Error::ModelVersion`) a stored record whose major version is
    /// newer than `supported_major`, so an older binary never loads a
    /// blob it cannot interpret.
    pub fn get_model(&self, name: &str, supported_major: u64) -> Result<Option<ModelRecord>, Error> {
        let conn = self.lock_reader();
        models::get_model(&conn, name, supported_major)
    }

    /// Deletes samples and events older than `retention_days` and
    /// checkpoints the WAL (spec §4.E). Intended to be called
    /// periodically by the maintenance thread. Runs on the writer
    /// connection only, so concurrent readers are never blocked by a
    /// prune (spec §4.E: "pruning never blocks writers because WAL mode
    /// permits concurrent reads").
    pub fn prune(&self, now: i64, retention_days: u32) -> Result<retention::PruneStats, Error> {
        let conn = self.lock_writer();
        retention::prune(&conn, now, retention_days, self.wal_checkpoint_interval)
    }

    /// Exports samples for `host` in `[ts_from, ts_to]` as CSV, column
    /// order matching the schema (spec §6.5).
    pub fn export_csv(&self, host: &str, ts_from: i64, ts_to: i64) -> Result<String, Error> {
        let samples = self.read_window(host, ts_from, ts_to)?;
        Ok(export::to_csv(&samples))
    }

    /// Exports samples for `host` in `[ts_from, ts_to]` as a JSON array
    /// of objects (spec §6.5).
    pub fn export_json(&self, host: &str, ts_from: i64, ts_to: i64) -> Result<String, Error> {
        let samples = self.read_window(host, ts_from, ts_to)?;
        export::to_json(&samples)
    }
}

#[cfg(test)]
mod test {
    use sysmon_types::{Event, EventType};

    use super::*;

    fn sample(ts: i64, host: &str, cpu: f64) -> Sample {
        Sample {
            ts,
            host: host.to_string(),
            cpu_pct: cpu,
            mem_pct: 0.0,
            disk_read_bps: 0.0,
            disk_write_bps: 0.0,
            net_up_bps: 0.0,
            net_down_bps: 0.0,
            swap_pct: 0.0,
            proc_count: 0,
            cpu_temp: None,
        }
    }

    #[test]
    fn scenario_1_insert_then_window_query_returns_rows_in_ts_order() {
        let store = Store::open_in_memory().unwrap();
        let samples = vec![sample(100, "h1", 1.0), sample(101, "h1", 2.0), sample(102, "h1", 3.0)];
        assert_eq!(store.insert_samples(&samples).unwrap(), 3);

        let rows = store.read_window("h1", 100, 102).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![100, 101, 102]);
    }

    #[test]
    fn window_query_excludes_samples_outside_the_range() {
        let store = Store::open_in_memory().unwrap();
        let samples = vec![sample(1, "h1", 0.0), sample(5, "h1", 0.0), sample(10, "h1", 0.0)];
        let _ = store.insert_samples(&samples).unwrap();
        let rows = store.read_window("h1", 2, 9).unwrap();
        assert_eq!(rows.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn duplicate_host_ts_pairs_are_not_double_inserted() {
        let store = Store::open_in_memory().unwrap();
        let _ = store.insert_samples(&[sample(1, "h1", 1.0)]).unwrap();
        let inserted = store.insert_samples(&[sample(1, "h1", 2.0)]).unwrap();
        assert_eq!(inserted, 0, "(host, ts) is unique, the second insert is a no-op");
        assert_eq!(store.count("h1").unwrap(), 1);
    }

    #[test]
    fn model_records_round_trip_with_metadata() {
        let store = Store::open_in_memory().unwrap();
        let record = ModelRecord {
            name: "anomaly".to_string(),
            algo: sysmon_types::ModelAlgo::IsolationForest,
            version: "1.2.0".to_string(),
            trained_at: 1000,
            meta: serde_json::json!({"threshold": 0.62}),
            blob: vec![1, 2, 3, 4],
        };
        store.put_model(&record).unwrap();
        let loaded = store.get_model("anomaly", 1).unwrap().expect("model present");
        assert_eq!(loaded.blob, record.blob);
        assert_eq!(loaded.meta["threshold"], 0.62);
    }

    #[test]
    fn a_newer_major_model_version_than_supported_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let record = ModelRecord {
            name: "anomaly".to_string(),
            algo: sysmon_types::ModelAlgo::IsolationForest,
            version: "2.0.0".to_string(),
            trained_at: 0,
            meta: serde_json::json!({}),
            blob: vec![],
        };
        store.put_model(&record).unwrap();
        assert!(store.get_model("anomaly", 1).is_err());
    }

    #[test]
    fn prune_deletes_samples_and_events_past_the_retention_window() {
        let store = Store::open_in_memory().unwrap();
        let now = 1_000_000;
        let day = 86_400;
        let _ = store
            .insert_samples(&[sample(now - 40 * day, "h1", 1.0), sample(now - 1, "h1", 2.0)])
            .unwrap();
        let _ = store
            .insert_event(&Event {
                id: None,
                ts: now - 40 * day,
                r#type: EventType::Anomaly,
                score: Some(1.0),
                metric_tags: vec!["cpu_pct".into()],
                explanation: "old".into(),
            })
            .unwrap();

        let stats = store.prune(now, 30).unwrap();
        assert_eq!(stats.samples_deleted, 1);
        assert_eq!(stats.events_deleted, 1);
        assert_eq!(store.count("h1").unwrap(), 1);
    }

    #[test]
    fn export_csv_and_json_preserve_schema_column_order() {
        let store = Store::open_in_memory().unwrap();
        let _ = store.insert_samples(&[sample(1, "h1", 42.0)]).unwrap();
        let csv = store.export_csv("h1", 0, 10).unwrap();
        assert!(csv.starts_with("ts,host,cpu_pct,mem_pct,"));
        let json = store.export_json("h1", 0, 10).unwrap();
        assert!(json.contains("\"cpu_pct\":42.0"));
    }
}
