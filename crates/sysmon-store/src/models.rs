//! Model record storage (spec §4.J): atomic insert-or-replace, and
//! major-version gating on load so an older binary never tries to
//! interpret a blob format it predates.

use rusqlite::{params, Connection, OptionalExtension};
use sysmon_types::{ModelAlgo, ModelRecord};

use crate::Error;

/// A stored model's major version is newer than this binary supports.
#[derive(thiserror::Error, Debug)]
#[error("model '{name}' has major version {found} but this binary supports up to {supported}")]
pub struct ModelVersionError {
    /// The model's name.
    pub name: String,
    /// The major version found in storage.
    pub found: u64,
    /// The highest major version this binary can load.
    pub supported: u64,
}

fn major_version(semver: &str) -> u64 {
    semver
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

fn algo_to_str(algo: ModelAlgo) -> &'static str {
    match algo {
        ModelAlgo::IsolationForest => "isolation_forest",
        ModelAlgo::LinearRegressor => "linear_regressor",
        ModelAlgo::GradientBoost => "gradient_boost",
    }
}

fn algo_from_str(s: &str) -> Result<ModelAlgo, Error> {
    match s {
        "isolation_forest" => Ok(ModelAlgo::IsolationForest),
        "linear_regressor" => Ok(ModelAlgo::LinearRegressor),
        "gradient_boost" => Ok(ModelAlgo::GradientBoost),
        other => Err(Error::Corrupt { reason: format!("unknown model algo column value: {other}") }),
    }
}

pub(crate) fn put_model(conn: &Connection, record: &ModelRecord) -> Result<(), Error> {
    let _ = conn.execute(
        "INSERT INTO models (name, algo, version, trained_at, meta, blob)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO UPDATE SET
             algo = excluded.algo,
             version = excluded.version,
             trained_at = excluded.trained_at,
             meta = excluded.meta,
             blob = excluded.blob",
        params![
            record.name,
            algo_to_str(record.algo),
            record.version,
            record.trained_at,
            record.meta.to_string(),
            record.blob,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_model(conn: &Connection, name: &str, supported_major: u64) -> Result<Option<ModelRecord>, Error> {
    let row = conn
        .query_row(
            "SELECT name, algo, version, trained_at, meta, blob FROM models WHERE name = ?1",
            [name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((name, algo, version, trained_at, meta, blob)) = row else {
        return Ok(None);
    };

    let found_major = major_version(&version);
    if found_major > supported_major {
        return Err(Error::ModelVersion(ModelVersionError {
            name,
            found: found_major,
            supported: supported_major,
        }));
    }

    let meta = serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null);
    Ok(Some(ModelRecord {
        name,
        algo: algo_from_str(&algo)?,
        version,
        trained_at,
        meta,
        blob,
    }))
}
