use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::interfaces::{InvalidSensor, ReadingLookup, Store, StoreError};
use crate::models::{
    AttemptLogEntry, AttemptStatus, ChannelValue, FileProvenance, PipelineStage, RawBatch, RawRow,
    Reading, Sensor, Window,
};
use crate::readers::{FetchError, FetchRequest, Source};

use super::commit::{commit, CommitError, CommitOutcome};

/// Values fixed for a whole pass
#[derive(Clone, Copy, Debug)]
pub struct CycleContext {
    pub now: DateTime<Utc>,
    pub tick: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The window was empty; nothing fetched or logged
    CaughtUp,
    NoNewReadings,
    Committed {
        rows: usize,
        watermark: DateTime<Utc>,
    },
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("sensor {0} has no watermark; seed one with set-watermark")]
    WatermarkMissing(i64),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidSensor(#[from] InvalidSensor),
}

/// Run one ingestion cycle for `sensor`.
pub fn run_cycle<S: Store>(
    store: &mut S,
    source: &dyn Source,
    sensor: &Sensor,
    ctx: CycleContext,
) -> Result<CycleOutcome, CycleError> {
    let purpose_id = sensor.purpose_id;

    let Some(watermark) = store.watermark(purpose_id)? else {
        let err = CycleError::WatermarkMissing(purpose_id);
        log::error!("Sensor {purpose_id}: {err}");
        record_failure(store, purpose_id, ctx.now, PipelineStage::DataAcquisition, &err);
        return Err(err);
    };

    let window = match Window::new(watermark + ctx.tick, ctx.now) {
        Ok(window) => window,
        Err(e) => {
            log::debug!("Sensor {purpose_id}: caught up ({e})");
            return Ok(CycleOutcome::CaughtUp);
        }
    };

    let batch = match source.fetch(&FetchRequest {
        sensor,
        window,
        stored: &*store,
    }) {
        Ok(batch) => batch,
        Err(e) => {
            log::error!(
                "Sensor {purpose_id}: {} fetch for [{}, {}) failed: {e}",
                sensor.source_type,
                window.start(),
                window.end()
            );
            record_failure(store, purpose_id, ctx.now, PipelineStage::DataAcquisition, &e);
            return Err(e.into());
        }
    };
    log::debug!("Sensor {purpose_id}: fetched {} rows", batch.len());
    store.log_attempt(&acquisition_entry(purpose_id, ctx.now, watermark, &batch))?;

    let rows = match select_new_rows(&*store, sensor, watermark, &batch, ctx.now) {
        Ok(rows) => rows,
        Err(e) => {
            log::error!("Sensor {purpose_id}: could not check stored readings: {e}");
            record_failure(store, purpose_id, ctx.now, PipelineStage::DatabaseInsertion, &e);
            return Err(e.into());
        }
    };

    match commit(store, purpose_id, &rows, ctx.now) {
        Ok(CommitOutcome::NoNewReadings) => {
            log::info!("Sensor {purpose_id}: no new readings");
            Ok(CycleOutcome::NoNewReadings)
        }
        Ok(CommitOutcome::Committed { rows, watermark }) => {
            log::info!("Sensor {purpose_id}: stored {rows} readings up to {watermark}");
            Ok(CycleOutcome::Committed { rows, watermark })
        }
        Err(e) => {
            log::error!("Sensor {purpose_id}: {e}");
            record_failure(store, purpose_id, ctx.now, PipelineStage::DatabaseInsertion, &e);
            Err(e.into())
        }
    }
}

const STALE_FILE_NOTE: &str =
    "all rows at or before the watermark, not ingested; rewind with set-watermark to back-fill";

#[derive(Serialize)]
struct FileDetail<'a> {
    #[serde(flatten)]
    file: &'a FileProvenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'static str>,
}

fn acquisition_entry(
    purpose_id: i64,
    now: DateTime<Utc>,
    watermark: DateTime<Utc>,
    batch: &RawBatch,
) -> AttemptLogEntry {
    let entry = AttemptLogEntry::new(
        purpose_id,
        now,
        PipelineStage::DataAcquisition,
        AttemptStatus::Success,
    );
    if batch.provenance().is_empty() {
        return entry;
    }
    let files: Vec<FileDetail> = batch
        .provenance()
        .iter()
        .map(|file| {
            let stale = file.latest <= watermark;
            if stale {
                log::warn!(
                    "Sensor {purpose_id}: {} ends at {}, not after watermark {watermark}",
                    file.file_name,
                    file.latest
                );
            }
            FileDetail {
                file,
                note: stale.then_some(STALE_FILE_NOTE),
            }
        })
        .collect();
    match serde_json::to_string(&files) {
        Ok(detail) => entry.with_detail(detail),
        Err(e) => {
            log::warn!("Sensor {purpose_id}: could not serialize file provenance: {e}");
            entry
        }
    }
}

/// A failed write here must not hide the original error
pub(super) fn record_failure<S: Store>(
    store: &mut S,
    purpose_id: i64,
    now: DateTime<Utc>,
    stage: PipelineStage,
    err: &dyn Display,
) {
    let entry = AttemptLogEntry::new(purpose_id, now, stage, AttemptStatus::Failure)
        .with_detail(err.to_string());
    if let Err(e) = store.log_attempt(&entry) {
        log::error!(
            "Sensor {purpose_id}: could not record {} failure: {e}",
            stage.as_str()
        );
    }
}

/// Rows newer than `watermark` for the sensor's channel that are not stored
/// yet, first occurrence of each timestamp only
fn select_new_rows(
    stored: &dyn ReadingLookup,
    sensor: &Sensor,
    watermark: DateTime<Utc>,
    batch: &RawBatch,
    upload_timestamp: DateTime<Utc>,
) -> Result<Vec<Reading>, StoreError> {
    let candidates: Vec<(DateTime<Utc>, &ChannelValue)> = batch
        .rows()
        .iter()
        .filter(|row| row.timestamp > watermark)
        .filter_map(|row| sensor_channel(sensor, row).map(|c| (row.timestamp, c)))
        .filter(|(ts, c)| {
            let finite = c.value.is_finite();
            if !finite {
                log::debug!("Sensor {}: dropping non-finite value at {ts}", sensor.purpose_id);
            }
            finite
        })
        .collect();

    let (from, to) = match (candidates.first(), candidates.last()) {
        (Some(first), Some(last)) => (first.0, last.0),
        _ => return Ok(vec![]),
    };
    let already_stored = stored.stored_between(sensor.purpose_id, from, to)?;

    Ok(candidates
        .into_iter()
        .filter(|(ts, _)| !already_stored.contains(ts))
        .unique_by(|(ts, _)| *ts)
        .map(|(timestamp, channel)| Reading {
            purpose_id: sensor.purpose_id,
            timestamp,
            value: channel.value,
            unit: channel.unit.clone().unwrap_or_else(|| sensor.unit.clone()),
            upload_timestamp,
        })
        .collect())
}

fn sensor_channel<'a>(sensor: &Sensor, row: &'a RawRow) -> Option<&'a ChannelValue> {
    match &sensor.channel {
        Some(name) => row.channel(name),
        None => row.channels.first(),
    }
}
