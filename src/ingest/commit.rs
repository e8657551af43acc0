use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::interfaces::{CommitBatch, Store, StoreError};
use crate::models::{AttemptLogEntry, AttemptStatus, PipelineStage, Reading};

#[derive(Error, Debug)]
#[error("commit for sensor {purpose_id} failed: {source}")]
pub struct CommitError {
    pub purpose_id: i64,
    #[source]
    pub source: StoreError,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommitOutcome {
    NoNewReadings,
    Committed {
        rows: usize,
        watermark: DateTime<Utc>,
    },
}

/// Persist `rows` for one sensor as a single unit.
///
/// `rows` must be ascending with unique timestamps, all newer than the
/// current watermark. On success the watermark moves to the last row and one
/// `database_insertion` entry is written in the same transaction. On error
/// nothing is written; recording the failure is left to the caller.
pub fn commit<S: Store + ?Sized>(
    store: &mut S,
    purpose_id: i64,
    rows: &[Reading],
    attempt_time: DateTime<Utc>,
) -> Result<CommitOutcome, CommitError> {
    let to_commit_error = |source| CommitError { purpose_id, source };

    let Some(last) = rows.last() else {
        log_no_new_readings(store, purpose_id, attempt_time).map_err(to_commit_error)?;
        return Ok(CommitOutcome::NoNewReadings);
    };

    let entry = AttemptLogEntry::new(
        purpose_id,
        attempt_time,
        PipelineStage::DatabaseInsertion,
        AttemptStatus::Success,
    );
    let inserted = store
        .apply_commit(&CommitBatch {
            purpose_id,
            rows,
            watermark: last.timestamp,
            entry: &entry,
        })
        .map_err(to_commit_error)?;

    if inserted == 0 {
        // another writer got there first; the transaction was rolled back
        log_no_new_readings(store, purpose_id, attempt_time).map_err(to_commit_error)?;
        return Ok(CommitOutcome::NoNewReadings);
    }

    Ok(CommitOutcome::Committed {
        rows: inserted,
        watermark: last.timestamp,
    })
}

fn log_no_new_readings<S: Store + ?Sized>(
    store: &mut S,
    purpose_id: i64,
    attempt_time: DateTime<Utc>,
) -> Result<(), StoreError> {
    store.log_attempt(&AttemptLogEntry::new(
        purpose_id,
        attempt_time,
        PipelineStage::DatabaseInsertion,
        AttemptStatus::NoNewReadings,
    ))
}
