//! Fixtures shared by unit tests

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;

use crate::interfaces::{
    CommitBatch, InvalidSensor, ReadingLookup, SqliteStore, Store, StoreError,
};
use crate::models::{AttemptLogEntry, ChannelValue, RawBatch, RawRow, Sensor, SourceType};
use crate::readers::{FetchError, FetchRequest, Source};

pub static T0: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2019, 6, 14, 22, 35, 0).unwrap());

pub fn at(seconds: i64) -> DateTime<Utc> {
    *T0 + Duration::seconds(seconds)
}

pub fn sensor(purpose_id: i64, source_type: SourceType) -> Sensor {
    Sensor {
        purpose_id,
        source_type,
        query_string: format!("device{purpose_id}"),
        channel: None,
        unit: "kW".into(),
        is_active: true,
        note: None,
    }
}

pub fn row(seconds: i64, value: f64) -> RawRow {
    RawRow {
        timestamp: at(seconds),
        channels: vec![ChannelValue {
            name: "Usage [kW]".into(),
            unit: None,
            value,
        }],
    }
}

/// Store with sensor `1` (egauge) watermarked at `T0`
pub fn seeded_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store
        .add_sensor(&sensor(1, SourceType::Egauge), Some(*T0))
        .unwrap();
    store
}

pub struct NoStoredReadings;

impl ReadingLookup for NoStoredReadings {
    fn contains_reading(&self, _: i64, _: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(false)
    }

    fn stored_between(
        &self,
        _: i64,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        Ok(BTreeSet::new())
    }
}

/// Source returning canned results, recording every requested window
pub struct FakeSource {
    result: RefCell<Option<Result<RawBatch, FetchError>>>,
    rows: Vec<RawRow>,
    pub calls: Cell<usize>,
    pub windows: RefCell<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeSource {
    /// Serves `rows` that fall in the requested window on every call
    pub fn with_rows(rows: Vec<RawRow>) -> Self {
        FakeSource {
            result: RefCell::new(None),
            rows,
            calls: Cell::new(0),
            windows: RefCell::new(vec![]),
        }
    }

    /// Fails the first call with `err`
    pub fn failing(err: FetchError) -> Self {
        FakeSource {
            result: RefCell::new(Some(Err(err))),
            ..FakeSource::with_rows(vec![])
        }
    }
}

impl Source for FakeSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawBatch, FetchError> {
        self.calls.set(self.calls.get() + 1);
        self.windows
            .borrow_mut()
            .push((request.window.start(), request.window.end()));
        if let Some(result) = self.result.borrow_mut().take() {
            return result;
        }
        // like the HTTP sources, only the requested window comes back
        Ok(RawBatch::new(
            self.rows
                .iter()
                .filter(|r| request.window.contains(r.timestamp))
                .cloned()
                .collect(),
        ))
    }
}

/// Delegates to SQLite but refuses every commit
pub struct BrokenCommitStore(pub SqliteStore);

impl ReadingLookup for BrokenCommitStore {
    fn contains_reading(&self, purpose_id: i64, ts: DateTime<Utc>) -> Result<bool, StoreError> {
        self.0.contains_reading(purpose_id, ts)
    }

    fn stored_between(
        &self,
        purpose_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        self.0.stored_between(purpose_id, from, to)
    }
}

impl Store for BrokenCommitStore {
    fn active_sensors(&self) -> Result<Vec<Result<Sensor, InvalidSensor>>, StoreError> {
        self.0.active_sensors()
    }

    fn watermark(&self, purpose_id: i64) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.0.watermark(purpose_id)
    }

    fn apply_commit(&mut self, batch: &CommitBatch<'_>) -> Result<usize, StoreError> {
        log::debug!("refusing commit for sensor {}", batch.purpose_id);
        Err(StoreError::Db(readingdb::ReadingDbError::Sqlite(
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                Some("disk I/O error".into()),
            ),
        )))
    }

    fn log_attempt(&mut self, entry: &AttemptLogEntry) -> Result<(), StoreError> {
        self.0.log_attempt(entry)
    }
}
