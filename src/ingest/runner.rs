use chrono::{DateTime, Duration, Utc};

use crate::interfaces::{Store, StoreError};
use crate::models::{PipelineStage, SourceType};
use crate::readers::SourceProvider;

use super::cycle::{record_failure, run_cycle, CycleContext, CycleError, CycleOutcome};

#[derive(Debug)]
pub struct SensorResult {
    pub purpose_id: i64,
    /// `None` when the sensor record itself could not be read
    pub source_type: Option<SourceType>,
    pub outcome: Result<CycleOutcome, CycleError>,
}

/// Per-sensor outcomes of one pass, in sensor order
#[derive(Debug)]
pub struct PassReport {
    pub started: DateTime<Utc>,
    pub results: Vec<SensorResult>,
}

impl PassReport {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }

    pub fn committed_rows(&self) -> usize {
        self.results
            .iter()
            .map(|r| match r.outcome {
                Ok(CycleOutcome::Committed { rows, .. }) => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

/// One pass over every active sensor, sequentially. A failing sensor is
/// recorded in the report and does not stop the others, and neither does an
/// unreadable sensor record. Only failing to list the sensors aborts the pass.
pub fn run_pass<S: Store, P: SourceProvider + ?Sized>(
    store: &mut S,
    sources: &P,
    now: DateTime<Utc>,
    tick: Duration,
) -> Result<PassReport, StoreError> {
    let ctx = CycleContext { now, tick };
    let sensors = store.active_sensors()?;
    log::info!("Starting pass at {now} over {} active sensors", sensors.len());

    let mut results = Vec::with_capacity(sensors.len());
    for entry in sensors {
        let sensor = match entry {
            Ok(sensor) => sensor,
            Err(invalid) => {
                let purpose_id = invalid.purpose_id;
                let err = CycleError::from(invalid);
                log::error!("Sensor {purpose_id} skipped: {err}");
                record_failure(store, purpose_id, now, PipelineStage::DataAcquisition, &err);
                results.push(SensorResult {
                    purpose_id,
                    source_type: None,
                    outcome: Err(err),
                });
                continue;
            }
        };
        let outcome = run_cycle(store, sources.source_for(sensor.source_type), &sensor, ctx);
        if let Err(e) = &outcome {
            log::error!(
                "Sensor {} ({}) failed: {e}",
                sensor.purpose_id,
                sensor.source_type
            );
        }
        results.push(SensorResult {
            purpose_id: sensor.purpose_id,
            source_type: Some(sensor.source_type),
            outcome,
        });
    }

    let report = PassReport {
        started: now,
        results,
    };
    log::info!(
        "Pass finished: {} sensors, {} readings stored, {} failures",
        report.results.len(),
        report.committed_rows(),
        report.failures()
    );
    Ok(report)
}
