//! SQLite persistence for sensor readings, per-sensor watermarks and the
//! ingestion attempt log.
//!
//! Timestamps are stored as UTC epoch milliseconds. The watermark lives on the
//! `sensor_info` row so that appending readings and advancing it can happen in
//! one transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

mod migrations;

pub use migrations::CURRENT_SCHEMA_VERSION;

#[derive(Error, Debug)]
pub enum ReadingDbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("database schema version is {found}, expected {expected}; run `init-db` first")]
    SchemaVersion { found: i32, expected: i32 },
    #[error("no sensor with purpose id {0}")]
    UnknownSensor(i64),
    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SensorRow {
    pub purpose_id: i64,
    pub source_type: String,
    pub query_string: String,
    pub channel: Option<String>,
    pub unit: String,
    pub is_active: bool,
    pub note: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadingRow {
    pub purpose_id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    pub upload_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttemptRow {
    pub purpose_id: i64,
    pub attempt_time: DateTime<Utc>,
    pub pipeline_stage: String,
    pub status: String,
    pub detail: Option<String>,
}

pub struct ReadingDb {
    conn: Connection,
}

impl ReadingDb {
    /// Open an existing database. The schema must already be at the current version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadingDbError> {
        log::debug!("Opening reading database at {:?}", path.as_ref());
        let db = ReadingDb {
            conn: Connection::open(path)?,
        };
        db.check_schema()?;
        Ok(db)
    }

    /// Open (creating if needed) a database and bring its schema up to date.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ReadingDbError> {
        // Create directory for DB if it doesn't already exist
        std::fs::create_dir_all(path.as_ref().parent().unwrap_or(Path::new("")))?;
        let mut conn = Connection::open(path)?;
        migrations::run_migrations(&mut conn)?;
        Ok(ReadingDb { conn })
    }

    pub fn create_in_memory() -> Result<Self, ReadingDbError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_migrations(&mut conn)?;
        Ok(ReadingDb { conn })
    }

    fn check_schema(&self) -> Result<(), ReadingDbError> {
        let found = migrations::schema_version(&self.conn)?;
        if found != CURRENT_SCHEMA_VERSION {
            return Err(ReadingDbError::SchemaVersion {
                found,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    pub fn insert_sensor(&self, sensor: &SensorRow) -> Result<(), ReadingDbError> {
        self.conn.execute(
            "INSERT INTO sensor_info (
                purpose_id, source_type, query_string, channel, unit, is_active, note,
                last_updated_datetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sensor.purpose_id,
                sensor.source_type,
                sensor.query_string,
                sensor.channel,
                sensor.unit,
                sensor.is_active,
                sensor.note,
                sensor.last_updated.map(|ts| ts.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    pub fn sensors(&self, active_only: bool) -> Result<Vec<SensorRow>, ReadingDbError> {
        let mut stmt = self.conn.prepare(
            "SELECT purpose_id, source_type, query_string, channel, unit, is_active, note,
                last_updated_datetime
            FROM sensor_info
            WHERE is_active = 1 OR ?1 = 0
            ORDER BY purpose_id",
        )?;
        let rows = stmt.query_map([active_only], sensor_from_row)?;
        rows.map(|r| -> Result<SensorRow, ReadingDbError> { sensor_with_watermark(r?) })
            .collect()
    }

    pub fn sensor(&self, purpose_id: i64) -> Result<Option<SensorRow>, ReadingDbError> {
        self.conn
            .query_row(
                "SELECT purpose_id, source_type, query_string, channel, unit, is_active, note,
                    last_updated_datetime
                FROM sensor_info WHERE purpose_id = ?1",
                [purpose_id],
                sensor_from_row,
            )
            .optional()?
            .map(sensor_with_watermark)
            .transpose()
    }

    pub fn watermark(&self, purpose_id: i64) -> Result<Option<DateTime<Utc>>, ReadingDbError> {
        let millis: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_updated_datetime FROM sensor_info WHERE purpose_id = ?1",
                [purpose_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(ReadingDbError::UnknownSensor(purpose_id))?;
        millis.map(from_millis).transpose()
    }

    /// Unconditionally set the watermark. Administrative use only; ingestion
    /// advances watermarks through [`ReadingDb::append_readings`].
    pub fn set_watermark(
        &self,
        purpose_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(), ReadingDbError> {
        let updated = self.conn.execute(
            "UPDATE sensor_info SET last_updated_datetime = ?2 WHERE purpose_id = ?1",
            params![purpose_id, watermark.timestamp_millis()],
        )?;
        if updated == 0 {
            return Err(ReadingDbError::UnknownSensor(purpose_id));
        }
        Ok(())
    }

    pub fn reading_exists(
        &self,
        purpose_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, ReadingDbError> {
        self.conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM reading WHERE purpose_id = ?1 AND datetime = ?2)",
                params![purpose_id, timestamp.timestamp_millis()],
                |r| r.get(0),
            )
            .map_err(Into::into)
    }

    /// Timestamps already stored for a sensor within `[from, to]`, ascending.
    pub fn reading_timestamps_between(
        &self,
        purpose_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, ReadingDbError> {
        let mut stmt = self.conn.prepare(
            "SELECT datetime FROM reading
            WHERE purpose_id = ?1 AND datetime BETWEEN ?2 AND ?3
            ORDER BY datetime",
        )?;
        let rows = stmt.query_map(
            params![purpose_id, from.timestamp_millis(), to.timestamp_millis()],
            |r| r.get::<_, i64>(0),
        )?;
        rows.map(|r| -> Result<DateTime<Utc>, ReadingDbError> { from_millis(r?) })
            .collect()
    }

    pub fn readings(&self, purpose_id: i64) -> Result<Vec<ReadingRow>, ReadingDbError> {
        let mut stmt = self.conn.prepare(
            "SELECT purpose_id, datetime, reading, units, upload_timestamp FROM reading
            WHERE purpose_id = ?1
            ORDER BY datetime",
        )?;
        let rows = stmt.query_map([purpose_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?;
        rows.map(|r| -> Result<ReadingRow, ReadingDbError> {
            let (purpose_id, ts, value, unit, uploaded) = r?;
            Ok(ReadingRow {
                purpose_id,
                timestamp: from_millis(ts)?,
                value,
                unit,
                upload_timestamp: from_millis(uploaded)?,
            })
        })
        .collect()
    }

    pub fn reading_count(&self, purpose_id: i64) -> Result<usize, ReadingDbError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM reading WHERE purpose_id = ?1",
                [purpose_id],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(Into::into)
    }

    /// Append readings, advance the watermark and record the attempt, all in
    /// one transaction.
    ///
    /// Rows colliding with an existing `(purpose_id, datetime)` are skipped.
    /// If none of the rows is new the transaction is rolled back and `Ok(0)`
    /// is returned, leaving the watermark and the attempt log untouched. The
    /// watermark is never lowered.
    pub fn append_readings(
        &mut self,
        purpose_id: i64,
        rows: &[ReadingRow],
        watermark: DateTime<Utc>,
        attempt: &AttemptRow,
    ) -> Result<usize, ReadingDbError> {
        let tx = self.conn.transaction()?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reading (purpose_id, datetime, reading, units, upload_timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (purpose_id, datetime) DO NOTHING",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    purpose_id,
                    row.timestamp.timestamp_millis(),
                    row.value,
                    row.unit,
                    row.upload_timestamp.timestamp_millis(),
                ])?;
            }
        }

        if inserted == 0 {
            log::debug!("No new rows for purpose {purpose_id}; rolling back");
            return Ok(0);
        }

        let updated = tx.execute(
            "UPDATE sensor_info SET last_updated_datetime = ?2
            WHERE purpose_id = ?1
                AND (last_updated_datetime IS NULL OR last_updated_datetime < ?2)",
            params![purpose_id, watermark.timestamp_millis()],
        )?;
        if updated == 0 {
            log::warn!("Watermark for purpose {purpose_id} not advanced to {watermark}");
        }

        insert_attempt(&tx, attempt)?;
        tx.commit()?;

        Ok(inserted)
    }

    pub fn insert_attempt(&self, attempt: &AttemptRow) -> Result<i64, ReadingDbError> {
        insert_attempt(&self.conn, attempt)
    }

    /// Most recent attempts for a sensor, newest first.
    pub fn attempts(&self, purpose_id: i64, limit: usize) -> Result<Vec<AttemptRow>, ReadingDbError> {
        let mut stmt = self.conn.prepare(
            "SELECT purpose_id, attempt_time, pipeline_stage, status, detail FROM attempt_log
            WHERE purpose_id = ?1
            ORDER BY log_id DESC
            LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![purpose_id, limit as i64], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?;
        rows.map(|r| -> Result<AttemptRow, ReadingDbError> {
            let (purpose_id, attempt_time, pipeline_stage, status, detail) = r?;
            Ok(AttemptRow {
                purpose_id,
                attempt_time: from_millis(attempt_time)?,
                pipeline_stage,
                status,
                detail,
            })
        })
        .collect()
    }
}

fn insert_attempt(conn: &Connection, attempt: &AttemptRow) -> Result<i64, ReadingDbError> {
    conn.execute(
        "INSERT INTO attempt_log (purpose_id, attempt_time, pipeline_stage, status, detail)
        VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            attempt.purpose_id,
            attempt.attempt_time.timestamp_millis(),
            attempt.pipeline_stage,
            attempt.status,
            attempt.detail,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn sensor_from_row(r: &Row<'_>) -> rusqlite::Result<(SensorRow, Option<i64>)> {
    Ok((
        SensorRow {
            purpose_id: r.get(0)?,
            source_type: r.get(1)?,
            query_string: r.get(2)?,
            channel: r.get(3)?,
            unit: r.get(4)?,
            is_active: r.get(5)?,
            note: r.get(6)?,
            last_updated: None,
        },
        r.get(7)?,
    ))
}

fn sensor_with_watermark(
    (sensor, millis): (SensorRow, Option<i64>),
) -> Result<SensorRow, ReadingDbError> {
    Ok(SensorRow {
        last_updated: millis.map(from_millis).transpose()?,
        ..sensor
    })
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, ReadingDbError> {
    DateTime::from_timestamp_millis(millis).ok_or(ReadingDbError::InvalidTimestamp(millis))
}
