//! HOBO data logger exports
//!
//! HOBOware CSV exports are copied by hand into a drop directory. Every file
//! is matched to a sensor by the logger serial in its plot title. A file whose
//! first and last readings are both already stored counts as ingested and is
//! skipped on later passes. A file that does not parse only fails the fetch
//! of the sensor its title names; for everyone else it is skipped.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{FileProvenance, RawBatch};

use super::{FetchError, FetchRequest, Source};

pub mod parse;

use parse::HoboExport;

const CSV_EXTENSION: &str = "csv";

pub struct FileDropSource {
    drop_dir: PathBuf,
    timezone: Tz,
}

impl FileDropSource {
    pub fn new(drop_dir: &Path, timezone: Tz) -> Self {
        FileDropSource {
            drop_dir: drop_dir.to_path_buf(),
            timezone,
        }
    }

    fn csv_files(&self) -> Result<Vec<PathBuf>, FetchError> {
        let entries = fs::read_dir(&self.drop_dir)
            .map_err(|e| FetchError::File(format!("{}: {e}", self.drop_dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(CSV_EXTENSION))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_export(&self, path: &Path) -> Result<HoboExport, FetchError> {
        let file =
            File::open(path).map_err(|e| FetchError::File(format!("{}: {e}", path.display())))?;
        parse::parse_export(file, self.timezone)
            .map_err(|e| FetchError::File(format!("{}: {e}", path.display())))
    }

    fn peek_serial(&self, path: &Path) -> Option<String> {
        File::open(path)
            .ok()
            .and_then(|file| parse::read_serial(file).ok())
    }
}

impl Source for FileDropSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawBatch, FetchError> {
        let sensor = request.sensor;
        let mut rows = vec![];
        let mut provenance = vec![];

        for path in self.csv_files()? {
            let export = match self.read_export(&path) {
                Ok(export) => export,
                Err(e) => {
                    if self.peek_serial(&path).as_deref() == Some(sensor.query_string.as_str()) {
                        return Err(e);
                    }
                    log::warn!("Skipping unreadable export {e}");
                    continue;
                }
            };
            if export.serial != sensor.query_string {
                continue;
            }
            let (earliest, latest) = match (export.rows.first(), export.rows.last()) {
                (Some(first), Some(last)) => (first.timestamp, last.timestamp),
                _ => {
                    log::warn!("{} has no readings", path.display());
                    continue;
                }
            };
            if request.stored.contains_reading(sensor.purpose_id, earliest)?
                && request.stored.contains_reading(sensor.purpose_id, latest)?
            {
                log::debug!("{} already ingested, skipping", path.display());
                continue;
            }

            log::info!(
                "Reading {} ({} rows, {} to {}) for sensor {}",
                path.display(),
                export.rows.len(),
                earliest,
                latest,
                sensor.purpose_id
            );
            provenance.push(FileProvenance {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                modified: modified_time(&path),
                earliest,
                latest,
            });
            rows.extend(
                export
                    .rows
                    .into_iter()
                    .filter(|r| r.timestamp < request.window.end()),
            );
        }

        Ok(RawBatch::new(rows).with_provenance(provenance))
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
