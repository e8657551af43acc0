//! Telemetry sources
//!
//! Every source family turns a sensor plus a time window into a normalized
//! [`RawBatch`]. The family is picked from the sensor's `source_type`.

use thiserror::Error;

use crate::config::PollerConfig;
use crate::interfaces::{http, ReadingLookup, StoreError};
use crate::models::{RawBatch, Sensor, SourceType, Window};

pub mod egauge;
pub mod hobo;
pub mod webctrl;

pub use egauge::MeterApiSource;
pub use hobo::FileDropSource;
pub use webctrl::BuildingAutomationSource;

/// Upper bound on how much of an error response body is kept
const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("file error: {0}")]
    File(String),
    #[error("source not configured: {0}")]
    NotConfigured(String),
    #[error("could not check stored readings: {0}")]
    Lookup(#[from] StoreError),
}

impl FetchError {
    /// Upstream HTTP status, if the failure came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY)
                    .collect();
                FetchError::Status { status, body }
            }
            ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
        }
    }
}

pub struct FetchRequest<'a> {
    pub sensor: &'a Sensor,
    pub window: Window,
    /// Already-stored readings, for sources that decide novelty themselves
    pub stored: &'a dyn ReadingLookup,
}

pub trait Source {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawBatch, FetchError>;
}

/// Picks the source client for a sensor
pub trait SourceProvider {
    fn source_for(&self, source_type: SourceType) -> &dyn Source;
}

/// One configured client per source family
pub struct SourceClients {
    egauge: MeterApiSource,
    webctrl: BuildingAutomationSource,
    hobo: FileDropSource,
}

impl SourceClients {
    pub fn from_config(config: &PollerConfig) -> Result<Self, FetchError> {
        let agent = http::build_agent(config.http_timeout)
            .map_err(|e| FetchError::Transport(format!("TLS setup failed: {e}")))?;
        Ok(SourceClients {
            egauge: MeterApiSource::new(
                agent.clone(),
                &config.egauge_url_template,
                config.egauge_granularity,
            ),
            webctrl: BuildingAutomationSource::new(
                agent,
                &config.webctrl_url,
                config.webctrl_credentials.clone(),
                config.site_timezone,
            ),
            hobo: FileDropSource::new(&config.hobo_drop_dir, config.site_timezone),
        })
    }
}

impl SourceProvider for SourceClients {
    fn source_for(&self, source_type: SourceType) -> &dyn Source {
        match source_type {
            SourceType::Egauge => &self.egauge,
            SourceType::Webctrl => &self.webctrl,
            SourceType::Hobo => &self.hobo,
        }
    }
}
