use std::io::Read;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use thiserror::Error;

use crate::models::{ChannelValue, RawRow};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("file format error: {0}")]
    FileFormat(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
}

const TITLE_PREFIX: &str = "Plot Title:";
const TIMESTAMP_COLUMN: &str = "Date Time";
const UNIT_SEPARATOR: &str = ", ";
const TIMESTAMP_FORMAT: &str = "%m/%d/%y %I:%M:%S %p";

/// Contents of one HOBOware CSV export
#[derive(Debug, PartialEq)]
pub struct HoboExport {
    /// Logger serial number from the plot title
    pub serial: String,
    /// Ascending, one row per timestamp
    pub rows: Vec<RawRow>,
}

#[derive(Debug)]
struct Column {
    index: usize,
    name: String,
    unit: Option<String>,
}

pub fn parse_export<R: Read>(input: R, timezone: Tz) -> Result<HoboExport, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut records = reader.records();

    let title = records
        .next()
        .ok_or_else(|| ParseError::FileFormat("file is empty".into()))??;
    let serial = parse_serial(title.get(0).unwrap_or_default())?;

    let headers = records
        .next()
        .ok_or_else(|| ParseError::FileFormat("cannot read header line".into()))??;
    let (ts_index, gmt_offset) = headers
        .iter()
        .enumerate()
        .find_map(|(i, h)| {
            let (name, rest) = split_header(h);
            (name == TIMESTAMP_COLUMN).then(|| (i, rest.and_then(parse_gmt_offset)))
        })
        .ok_or_else(|| ParseError::FileFormat(format!("no '{TIMESTAMP_COLUMN}' column")))?;
    let columns = headers
        .iter()
        .enumerate()
        // first column is the running sample number
        .filter(|(i, _)| *i != 0 && *i != ts_index)
        .map(|(index, h)| {
            let (name, rest) = split_header(h);
            Column {
                index,
                name: name.to_string(),
                unit: rest.and_then(|r| r.split_whitespace().next()).map(String::from),
            }
        })
        .collect::<Vec<_>>();

    let mut rows = vec![];
    for record in records {
        let record = record?;
        match parse_row(&record, ts_index, &columns, gmt_offset, timezone) {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!(
                "error parsing HOBO line {}: {}",
                record.position().map_or(0, |p| p.line()),
                e
            ),
        }
    }

    // Exports can repeat a timestamp around logger restarts; the first one wins
    let rows = rows
        .into_iter()
        .sorted_by_key(|r| r.timestamp)
        .dedup_by(|a, b| a.timestamp == b.timestamp)
        .collect();

    Ok(HoboExport { serial, rows })
}

/// Logger serial from the plot title alone, for files whose body does not
/// parse
pub fn read_serial<R: Read>(input: R) -> Result<String, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let title = reader
        .records()
        .next()
        .ok_or_else(|| ParseError::FileFormat("file is empty".into()))??;
    parse_serial(title.get(0).unwrap_or_default())
}

fn parse_serial(title: &str) -> Result<String, ParseError> {
    title
        .trim()
        .strip_prefix(TITLE_PREFIX)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::FileFormat(format!("expected plot title, got '{title}'")))
}

/// `"Temp, °F (LGR S/N: ...)"` -> `("Temp", Some("°F (LGR S/N: ...)"))`
fn split_header(header: &str) -> (&str, Option<&str>) {
    match header.split_once(UNIT_SEPARATOR) {
        Some((name, rest)) => (name.trim(), Some(rest.trim())),
        None => (header.trim(), None),
    }
}

/// `"GMT-10:00"` -> UTC-10
fn parse_gmt_offset(label: &str) -> Option<FixedOffset> {
    let offset = label.strip_prefix("GMT")?;
    let (sign, hhmm) = match offset.strip_prefix('+') {
        Some(rest) => (1, rest),
        None => (-1, offset.strip_prefix('-')?),
    };
    let (hours, minutes) = hhmm.split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * seconds)
}

fn parse_row(
    record: &csv::StringRecord,
    ts_index: usize,
    columns: &[Column],
    gmt_offset: Option<FixedOffset>,
    timezone: Tz,
) -> Result<RawRow, ParseError> {
    let raw_ts = record
        .get(ts_index)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ParseError::FileFormat("timestamp value not present".into()))?;
    let timestamp = parse_timestamp(raw_ts.trim(), gmt_offset, timezone)?;

    let channels = columns
        .iter()
        .filter_map(|column| {
            let value = record.get(column.index)?.trim().parse::<f64>().ok()?;
            Some(ChannelValue {
                name: column.name.clone(),
                unit: column.unit.clone(),
                value,
            })
        })
        .collect();

    Ok(RawRow {
        timestamp,
        channels,
    })
}

fn parse_timestamp(
    timestamp: &str,
    gmt_offset: Option<FixedOffset>,
    timezone: Tz,
) -> Result<DateTime<Utc>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)?;
    let local = match gmt_offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc)),
        None => timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    };
    local.ok_or_else(|| ParseError::FileFormat(format!("nonexistent local time '{timestamp}'")))
}
