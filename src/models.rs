use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// eGauge energy meter HTTP API
    Egauge,
    /// WebCTRL building automation trend server
    Webctrl,
    /// HOBO logger CSV exports dropped into a local directory
    Hobo,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Egauge => "egauge",
            SourceType::Webctrl => "webctrl",
            SourceType::Hobo => "hobo",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown source type '{0}'")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "egauge" => Ok(SourceType::Egauge),
            "webctrl" => Ok(SourceType::Webctrl),
            "hobo" => Ok(SourceType::Hobo),
            _ => Err(UnknownSourceType(s.to_string())),
        }
    }
}

/// One logical measurement stream ("purpose")
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Sensor {
    pub purpose_id: i64,
    pub source_type: SourceType,
    /// Source-specific address: eGauge device name, WebCTRL path, HOBO serial
    pub query_string: String,
    /// Column/channel of a multi-channel source that belongs to this purpose
    #[serde(default)]
    pub channel: Option<String>,
    pub unit: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Error, Debug, PartialEq)]
#[error("window start {start} is not before end {end}")]
pub struct InvalidWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Half-open time range `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidWindow> {
        if start >= end {
            return Err(InvalidWindow { start, end });
        }
        Ok(Window { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelValue {
    pub name: String,
    pub unit: Option<String>,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawRow {
    pub timestamp: DateTime<Utc>,
    pub channels: Vec<ChannelValue>,
}

impl RawRow {
    pub fn channel(&self, name: &str) -> Option<&ChannelValue> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Where a file-drop batch came from
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileProvenance {
    pub file_name: String,
    pub modified: Option<DateTime<Utc>>,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

/// Rows returned by one fetch, ascending by timestamp
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawBatch {
    rows: Vec<RawRow>,
    provenance: Vec<FileProvenance>,
}

impl RawBatch {
    /// Rows are put in timestamp order; the sort is stable so rows sharing a
    /// timestamp keep the order the source emitted them in.
    pub fn new(mut rows: Vec<RawRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        RawBatch {
            rows,
            provenance: vec![],
        }
    }

    pub fn with_provenance(mut self, provenance: Vec<FileProvenance>) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn provenance(&self) -> &[FileProvenance] {
        &self.provenance
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// A reading accepted for storage
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub purpose_id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    pub upload_timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    DataAcquisition,
    DatabaseInsertion,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::DataAcquisition => "data_acquisition",
            PipelineStage::DatabaseInsertion => "database_insertion",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    NoNewReadings,
    Failure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::NoNewReadings => "no_new_readings",
            AttemptStatus::Failure => "failure",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown attempt log value '{0}'")]
pub struct UnknownLogValue(pub String);

impl FromStr for PipelineStage {
    type Err = UnknownLogValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_acquisition" => Ok(PipelineStage::DataAcquisition),
            "database_insertion" => Ok(PipelineStage::DatabaseInsertion),
            _ => Err(UnknownLogValue(s.to_string())),
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = UnknownLogValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptStatus::Success),
            "no_new_readings" => Ok(AttemptStatus::NoNewReadings),
            "failure" => Ok(AttemptStatus::Failure),
            _ => Err(UnknownLogValue(s.to_string())),
        }
    }
}

/// Append-only record of one ingestion stage for one sensor
#[derive(Clone, Debug, PartialEq)]
pub struct AttemptLogEntry {
    pub purpose_id: i64,
    pub attempt_time: DateTime<Utc>,
    pub stage: PipelineStage,
    pub status: AttemptStatus,
    pub detail: Option<String>,
}

impl AttemptLogEntry {
    pub fn new(
        purpose_id: i64,
        attempt_time: DateTime<Utc>,
        stage: PipelineStage,
        status: AttemptStatus,
    ) -> Self {
        AttemptLogEntry {
            purpose_id,
            attempt_time,
            stage,
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 2, 1, 10, 0, 0).unwrap()
    }

    fn row(minutes: i64, name: &str, value: f64) -> RawRow {
        RawRow {
            timestamp: t0() + Duration::minutes(minutes),
            channels: vec![ChannelValue {
                name: name.into(),
                unit: None,
                value,
            }],
        }
    }

    #[test]
    fn empty_or_reversed_window_is_invalid() {
        assert!(Window::new(t0(), t0()).is_err());
        assert!(Window::new(t0() + Duration::seconds(1), t0()).is_err());
        let w = Window::new(t0(), t0() + Duration::minutes(1)).unwrap();
        assert!(w.contains(t0()));
        assert!(!w.contains(t0() + Duration::minutes(1)));
    }

    #[test]
    fn batch_sort_is_stable() {
        let batch = RawBatch::new(vec![row(2, "b", 2.0), row(1, "x", 1.0), row(2, "a", 3.0)]);
        let names: Vec<&str> = batch
            .rows()
            .iter()
            .map(|r| r.channels[0].name.as_str())
            .collect();
        assert_eq!(names, vec!["x", "b", "a"]);
    }

    #[test]
    fn parse_source_type() {
        assert_eq!("EGAUGE".parse::<SourceType>(), Ok(SourceType::Egauge));
        assert_eq!("hobo".parse::<SourceType>(), Ok(SourceType::Hobo));
        assert!("modbus".parse::<SourceType>().is_err());
    }

    #[test]
    fn sensor_from_json_defaults() {
        let sensor: Sensor = serde_json::from_str(
            r#"{"purpose_id": 3, "source_type": "hobo", "query_string": "10316583",
                "channel": "RH", "unit": "%"}"#,
        )
        .unwrap();
        assert!(sensor.is_active);
        assert_eq!(sensor.channel.as_deref(), Some("RH"));
        assert_eq!(sensor.note, None);
    }

    #[test]
    fn log_values_roundtrip_as_strings() {
        for status in [
            AttemptStatus::Success,
            AttemptStatus::NoNewReadings,
            AttemptStatus::Failure,
        ] {
            assert_eq!(status.as_str().parse::<AttemptStatus>(), Ok(status));
        }
        assert_eq!(
            "database_insertion".parse::<PipelineStage>(),
            Ok(PipelineStage::DatabaseInsertion)
        );
    }
}
