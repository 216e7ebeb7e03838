//! Event storage and retention pruning (spec §4.E).

use rusqlite::{params, Connection};
use sysmon_types::{Event, EventType};

use crate::Error;

pub(crate) fn insert_event(conn: &Connection, event: &Event) -> Result<i64, Error> {
    let _ = conn.execute(
        "INSERT INTO events (ts, type, score, metric_tags, explanation) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.ts,
            event.r#type.as_str(),
            event.score,
            event.metric_tags_column(),
            event.explanation,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn read_events(
    conn: &Connection,
    ts_from: i64,
    ts_to: i64,
    event_type: Option<EventType>,
) -> Result<Vec<Event>, Error> {
    let mut sql = String::from(
        "SELECT id, ts, type, score, metric_tags, explanation FROM events WHERE ts BETWEEN ?1 AND ?2",
    );
    if event_type.is_some() {
        sql.push_str(" AND type = ?3");
    }
    sql.push_str(" ORDER BY ts ASC");

    let mut stmt = conn.prepare(&sql)?;
    let row_to_event = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Event> {
        let type_col: String = row.get(2)?;
        Ok(Event {
            id: row.get(0)?,
            ts: row.get(1)?,
            r#type: EventType::parse(&type_col).unwrap_or(EventType::Threshold),
            score: row.get(3)?,
            metric_tags: Event::parse_metric_tags(&row.get::<_, String>(4)?),
            explanation: row.get(5)?,
        })
    };

    let rows = if let Some(event_type) = event_type {
        stmt.query_map(params![ts_from, ts_to, event_type.as_str()], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        stmt.query_map(params![ts_from, ts_to], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(rows)
}

/// Row counts removed by a `prune` call, surfaced to the maintenance
/// thread's periodic log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PruneStats {
    /// Number of sample rows deleted.
    pub samples_deleted: usize,
    /// Number of event rows deleted.
    pub events_deleted: usize,
}

pub(crate) fn prune(
    conn: &Connection,
    now: i64,
    retention_days: u32,
    wal_checkpoint_interval: u32,
) -> Result<PruneStats, Error> {
    let cutoff = now - i64::from(retention_days) * 86_400;

    let samples_deleted = conn.execute("DELETE FROM samples WHERE ts < ?1", [cutoff])?;
    let events_deleted = conn.execute("DELETE FROM events WHERE ts < ?1", [cutoff])?;

    if samples_deleted > 0 || events_deleted > 0 {
        // Force a checkpoint after pruning so the WAL file does not grow
        // unbounded between the configured auto-checkpoint interval.
        let _ = wal_checkpoint_interval;
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
    }

    Ok(PruneStats {
        samples_deleted,
        events_deleted,
    })
}
