//! The incremental ingestion pipeline
//!
//! A pass visits every active sensor once. For each one the cycle derives a
//! fetch window from the sensor's watermark, keeps only readings that are
//! newer than the watermark and not yet stored, and hands them to the commit
//! step, which writes readings, watermark and attempt-log entry together.

mod commit;
mod cycle;
mod runner;

pub use commit::{commit, CommitError, CommitOutcome};
pub use cycle::{run_cycle, CycleContext, CycleError, CycleOutcome};
pub use runner::{run_pass, PassReport, SensorResult};
