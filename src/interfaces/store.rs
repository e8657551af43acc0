use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use readingdb::{AttemptRow, ReadingDb, ReadingDbError, ReadingRow, SensorRow};
use thiserror::Error;

use crate::models::{AttemptLogEntry, Reading, Sensor, SourceType};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] ReadingDbError),
}

/// A `sensor_info` row that does not describe a usable sensor
#[derive(Error, Debug, Clone, PartialEq)]
#[error("sensor {purpose_id} has an invalid record: {reason}")]
pub struct InvalidSensor {
    pub purpose_id: i64,
    pub reason: String,
}

/// Read-only view of what has already been stored for a sensor
pub trait ReadingLookup {
    fn contains_reading(&self, purpose_id: i64, timestamp: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Stored timestamps within `[from, to]`
    fn stored_between(
        &self,
        purpose_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError>;
}

/// Rows to append together with the watermark they justify and the attempt
/// entry describing them. Applied as one atomic unit.
#[derive(Debug)]
pub struct CommitBatch<'a> {
    pub purpose_id: i64,
    pub rows: &'a [Reading],
    pub watermark: DateTime<Utc>,
    pub entry: &'a AttemptLogEntry,
}

pub trait Store: ReadingLookup {
    /// Active sensors by purpose id. A row that cannot be read comes back as
    /// its own `Err` entry next to the readable ones.
    fn active_sensors(&self) -> Result<Vec<Result<Sensor, InvalidSensor>>, StoreError>;

    fn watermark(&self, purpose_id: i64) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Apply a commit atomically; returns the number of rows that were new.
    /// When no row is new nothing at all is written and `Ok(0)` is returned.
    fn apply_commit(&mut self, batch: &CommitBatch<'_>) -> Result<usize, StoreError>;

    fn log_attempt(&mut self, entry: &AttemptLogEntry) -> Result<(), StoreError>;
}

/// [`Store`] backed by the SQLite reading database
pub struct SqliteStore {
    db: ReadingDb,
}

impl SqliteStore {
    pub fn new(db: ReadingDb) -> Self {
        SqliteStore { db }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(SqliteStore::new(ReadingDb::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(SqliteStore::new(ReadingDb::create_in_memory()?))
    }

    pub fn db(&self) -> &ReadingDb {
        &self.db
    }

    pub fn add_sensor(
        &self,
        sensor: &Sensor,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.db
            .insert_sensor(&SensorRow {
                purpose_id: sensor.purpose_id,
                source_type: sensor.source_type.as_str().to_string(),
                query_string: sensor.query_string.clone(),
                channel: sensor.channel.clone(),
                unit: sensor.unit.clone(),
                is_active: sensor.is_active,
                note: sensor.note.clone(),
                last_updated: watermark,
            })
            .map_err(Into::into)
    }

    pub fn set_watermark(
        &self,
        purpose_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db
            .set_watermark(purpose_id, watermark)
            .map_err(Into::into)
    }
}

impl ReadingLookup for SqliteStore {
    fn contains_reading(
        &self,
        purpose_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db
            .reading_exists(purpose_id, timestamp)
            .map_err(Into::into)
    }

    fn stored_between(
        &self,
        purpose_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        Ok(self
            .db
            .reading_timestamps_between(purpose_id, from, to)?
            .into_iter()
            .collect())
    }
}

impl Store for SqliteStore {
    fn active_sensors(&self) -> Result<Vec<Result<Sensor, InvalidSensor>>, StoreError> {
        Ok(self
            .db
            .sensors(true)?
            .into_iter()
            .map(sensor_from_row)
            .collect())
    }

    fn watermark(&self, purpose_id: i64) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.watermark(purpose_id).map_err(Into::into)
    }

    fn apply_commit(&mut self, batch: &CommitBatch<'_>) -> Result<usize, StoreError> {
        let rows: Vec<ReadingRow> = batch
            .rows
            .iter()
            .map(|r| ReadingRow {
                purpose_id: r.purpose_id,
                timestamp: r.timestamp,
                value: r.value,
                unit: r.unit.clone(),
                upload_timestamp: r.upload_timestamp,
            })
            .collect();
        self.db
            .append_readings(
                batch.purpose_id,
                &rows,
                batch.watermark,
                &attempt_row(batch.entry),
            )
            .map_err(Into::into)
    }

    fn log_attempt(&mut self, entry: &AttemptLogEntry) -> Result<(), StoreError> {
        self.db.insert_attempt(&attempt_row(entry))?;
        Ok(())
    }
}

fn attempt_row(entry: &AttemptLogEntry) -> AttemptRow {
    AttemptRow {
        purpose_id: entry.purpose_id,
        attempt_time: entry.attempt_time,
        pipeline_stage: entry.stage.as_str().to_string(),
        status: entry.status.as_str().to_string(),
        detail: entry.detail.clone(),
    }
}

fn sensor_from_row(row: SensorRow) -> Result<Sensor, InvalidSensor> {
    let source_type = row
        .source_type
        .parse::<SourceType>()
        .map_err(|e| InvalidSensor {
            purpose_id: row.purpose_id,
            reason: e.to_string(),
        })?;
    Ok(Sensor {
        purpose_id: row.purpose_id,
        source_type,
        query_string: row.query_string,
        channel: row.channel,
        unit: row.unit,
        is_active: row.is_active,
        note: row.note,
    })
}
