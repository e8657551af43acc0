use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::models::{ChannelValue, RawBatch, RawRow};

use super::{FetchError, FetchRequest, Source};

const DATE_FORMAT: &str = "%Y-%m-%d";
const ANALOG_CHANNEL: &str = "a";
const DIGITAL_CHANNEL: &str = "d";

#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    fn authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

#[derive(Debug, Deserialize)]
struct TrendSeries {
    id: String,
    #[serde(rename = "s", default)]
    samples: Vec<TrendSample>,
}

#[derive(Debug, Deserialize)]
struct TrendSample {
    /// Epoch milliseconds
    t: i64,
    #[serde(default)]
    a: Option<f64>,
    #[serde(default)]
    d: Option<DigitalValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DigitalValue {
    Flag(bool),
    Number(f64),
}

impl DigitalValue {
    fn as_f64(&self) -> f64 {
        match self {
            DigitalValue::Flag(true) => 1.0,
            DigitalValue::Flag(false) => 0.0,
            DigitalValue::Number(n) => *n,
        }
    }
}

/// WebCTRL bulk trend server
///
/// The server only takes calendar dates, so the request covers whole days in
/// the site timezone and the response is cut back down to the window.
pub struct BuildingAutomationSource {
    agent: ureq::Agent,
    endpoint: String,
    credentials: Option<Credentials>,
    timezone: Tz,
}

impl BuildingAutomationSource {
    pub fn new(
        agent: ureq::Agent,
        endpoint: &str,
        credentials: Option<Credentials>,
        timezone: Tz,
    ) -> Self {
        BuildingAutomationSource {
            agent,
            endpoint: endpoint.to_string(),
            credentials,
            timezone,
        }
    }

    fn local_date(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format(DATE_FORMAT)
            .to_string()
    }
}

impl Source for BuildingAutomationSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawBatch, FetchError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            FetchError::NotConfigured("WebCTRL username and password are not set".into())
        })?;
        let window = request.window;
        let start = self.local_date(window.start());
        let end = self.local_date(window.end());
        log::debug!(
            "Requesting WebCTRL trend {} from {} to {}",
            request.sensor.query_string,
            start,
            end
        );

        let series: Vec<TrendSeries> = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &credentials.authorization())
            .query("id", &request.sensor.query_string)
            .query("start", &start)
            .query("end", &end)
            .query("format", "json")
            .call()?
            .into_json()
            .map_err(|e| FetchError::Payload(e.to_string()))?;

        let mut rows = vec![];
        for trend in series {
            log::debug!("Trend {} returned {} samples", trend.id, trend.samples.len());
            for sample in trend.samples {
                if let Some(row) = sample_to_row(&sample)? {
                    if window.contains(row.timestamp) {
                        rows.push(row);
                    }
                }
            }
        }
        Ok(RawBatch::new(rows))
    }
}

fn sample_to_row(sample: &TrendSample) -> Result<Option<RawRow>, FetchError> {
    let timestamp = DateTime::from_timestamp_millis(sample.t)
        .ok_or_else(|| FetchError::Payload(format!("invalid sample time {}", sample.t)))?;
    let channel = match (&sample.a, &sample.d) {
        (Some(value), _) => ChannelValue {
            name: ANALOG_CHANNEL.into(),
            unit: None,
            value: *value,
        },
        (None, Some(digital)) => ChannelValue {
            name: DIGITAL_CHANNEL.into(),
            unit: None,
            value: digital.as_f64(),
        },
        (None, None) => {
            log::warn!("Skipping WebCTRL sample at {timestamp} without a value");
            return Ok(None);
        }
    };
    Ok(Some(RawRow {
        timestamp,
        channels: vec![channel],
    }))
}
