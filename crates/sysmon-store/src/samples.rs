//! Sample inserts and reads (spec §4.E).

use rusqlite::{params, Connection};
use sysmon_types::Sample;

use crate::Error;

/// The most recent sample for one host, as returned by `latest_per_host`.
#[derive(Debug, Clone)]
pub struct LatestSample {
    /// The host this row belongs to.
    pub host: String,
    /// The sample itself.
    pub sample: Sample,
}

pub(crate) fn insert_batch(conn: &mut Connection, samples: &[Sample]) -> Result<usize, Error> {
    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO samples
                (ts, host, cpu_pct, mem_pct, disk_read_bps, disk_write_bps,
                 net_up_bps, net_down_bps, swap_pct, proc_count, cpu_temp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for sample in samples {
            let changed = stmt.execute(params![
                sample.ts,
                sample.host,
                sample.cpu_pct,
                sample.mem_pct,
                sample.disk_read_bps,
                sample.disk_write_bps,
                sample.net_up_bps,
                sample.net_down_bps,
                sample.swap_pct,
                sample.proc_count,
                sample.cpu_temp,
            ])?;
            inserted += changed;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        ts: row.get("ts")?,
        host: row.get("host")?,
        cpu_pct: row.get("cpu_pct")?,
        mem_pct: row.get("mem_pct")?,
        disk_read_bps: row.get("disk_read_bps")?,
        disk_write_bps: row.get("disk_write_bps")?,
        net_up_bps: row.get("net_up_bps")?,
        net_down_bps: row.get("net_down_bps")?,
        swap_pct: row.get("swap_pct")?,
        proc_count: row.get("proc_count")?,
        cpu_temp: row.get("cpu_temp")?,
    })
}

pub(crate) fn read_window(conn: &Connection, host: &str, ts_from: i64, ts_to: i64) -> Result<Vec<Sample>, Error> {
    let mut stmt = conn.prepare(
        "SELECT * FROM samples WHERE host = ?1 AND ts BETWEEN ?2 AND ?3 ORDER BY ts ASC",
    )?;
    let rows = stmt
        .query_map(params![host, ts_from, ts_to], row_to_sample)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn count(conn: &Connection, host: &str) -> Result<u64, Error> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples WHERE host = ?1", [host], |row| row.get(0))?;
    Ok(count as u64)
}

pub(crate) fn latest_n(conn: &Connection, host: &str, n: usize) -> Result<Vec<Sample>, Error> {
    let mut stmt = conn.prepare(
        "SELECT * FROM (SELECT * FROM samples WHERE host = ?1 ORDER BY ts DESC LIMIT ?2) ORDER BY ts ASC",
    )?;
    let rows = stmt
        .query_map(params![host, n as i64], row_to_sample)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn latest_per_host(conn: &Connection) -> Result<Vec<LatestSample>, Error> {
    let mut stmt = conn.prepare(
        "SELECT s.* FROM samples s
         INNER JOIN (SELECT host, MAX(ts) AS max_ts FROM samples GROUP BY host) latest
           ON s.host = latest.host AND s.ts = latest.max_ts
         ORDER BY s.host ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let sample = row_to_sample(row)?;
            Ok(LatestSample { host: sample.host.clone(), sample })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Store;

    #[test]
    fn latest_n_returns_at_most_n_rows_ascending_by_ts() {
        let store = Store::open_in_memory().unwrap();
        let samples = (0..10)
            .map(|i| Sample {
                ts: i,
                host: "h1".into(),
                cpu_pct: i as f64,
                mem_pct: 0.0,
                disk_read_bps: 0.0,
                disk_write_bps: 0.0,
                net_up_bps: 0.0,
                net_down_bps: 0.0,
                swap_pct: 0.0,
                proc_count: 0,
                cpu_temp: None,
            })
            .collect::<Vec<_>>();
        let _ = store.insert_samples(&samples).unwrap();
        let latest = store.latest_n("h1", 3).unwrap();
        assert_eq!(latest.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn latest_per_host_returns_one_row_per_distinct_host() {
        let store = Store::open_in_memory().unwrap();
        let make = |host: &str, ts: i64| Sample {
            ts,
            host: host.into(),
            cpu_pct: 0.0,
            mem_pct: 0.0,
            disk_read_bps: 0.0,
            disk_write_bps: 0.0,
            net_up_bps: 0.0,
            net_down_bps: 0.0,
            swap_pct: 0.0,
            proc_count: 0,
            cpu_temp: None,
        };
        let _ = store
            .insert_samples(&[make("h1", 1), make("h1", 2), make("h2", 1)])
            .unwrap();
        let latest = store.latest_per_host().unwrap();
        assert_eq!(latest.len(), 2);
        let h1 = latest.iter().find(|r| r.host == "h1").unwrap();
        assert_eq!(h1.sample.ts, 2);
    }

    fn sample_at(ts: i64) -> Sample {
        Sample {
            ts,
            host: "h1".into(),
            cpu_pct: ts as f64,
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

    proptest::proptest! {
        /// A window read returns exactly the rows whose `ts` falls in
        /// `[ts_from, ts_to]`, in ascending order, regardless of how the
        /// rows were inserted or how the window is chosen.
        #[test]
        fn window_read_matches_the_requested_range(
            offsets in proptest::collection::btree_set(0i64..500, 1..60),
            lo in 0i64..500,
            span in 0i64..500,
        ) {
            let store = Store::open_in_memory().unwrap();
            let samples: Vec<Sample> = offsets.iter().map(|ts| sample_at(*ts)).collect();
            let _ = store.insert_samples(&samples).unwrap();

            let hi = lo + span;
            let rows = store.read_window("h1", lo, hi).unwrap();
            let got: Vec<i64> = rows.iter().map(|s| s.ts).collect();
            let expected: Vec<i64> = offsets.iter().copied().filter(|ts| *ts >= lo && *ts <= hi).collect();

            proptest::prop_assert_eq!(got, expected);
        }
    }
}
