use std::str::FromStr;

use chrono::DateTime;
use thiserror::Error;

use crate::models::{ChannelValue, RawBatch, RawRow};

use super::{FetchError, FetchRequest, Source};

const DEVICE_PLACEHOLDER: &str = "{device}";
const SHOW_PATH: &str = "cgi-bin/egauge-show";
const CSV_OUTPUT: &str = "c";
const TIMESTAMP_COLUMN: &str = "Date & Time";

/// Sampling granularity requested from the meter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    fn as_param(&self) -> &'static str {
        match self {
            Granularity::Minute => "m",
            Granularity::Hour => "h",
            Granularity::Day => "d",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("granularity must be one of 'm', 'h', 'd'")]
pub struct InvalidGranularity;

impl FromStr for Granularity {
    type Err = InvalidGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" => Ok(Granularity::Minute),
            "h" => Ok(Granularity::Hour),
            "d" => Ok(Granularity::Day),
            _ => Err(InvalidGranularity),
        }
    }
}

/// eGauge energy meter, read through its `egauge-show` CSV export
pub struct MeterApiSource {
    agent: ureq::Agent,
    url_template: String,
    granularity: Granularity,
}

impl MeterApiSource {
    pub fn new(agent: ureq::Agent, url_template: &str, granularity: Granularity) -> Self {
        MeterApiSource {
            agent,
            url_template: url_template.trim_end_matches('/').to_string(),
            granularity,
        }
    }

    fn show_url(&self, device: &str) -> String {
        format!(
            "{}/{SHOW_PATH}?{}&{CSV_OUTPUT}",
            self.url_template.replace(DEVICE_PLACEHOLDER, device),
            self.granularity.as_param()
        )
    }
}

impl Source for MeterApiSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawBatch, FetchError> {
        let window = request.window;
        let url = self.show_url(&request.sensor.query_string);
        log::debug!(
            "Requesting eGauge data from {} for [{}, {})",
            url,
            window.start(),
            window.end()
        );

        // The meter includes both bounds; pull the upper one in by a second
        let body = self
            .agent
            .get(&url)
            .query("t", &window.start().timestamp().to_string())
            .query("f", &(window.end().timestamp() - 1).to_string())
            .call()?
            .into_string()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let rows = parse_csv(&body)?
            .into_iter()
            .filter(|r| window.contains(r.timestamp))
            .collect();
        Ok(RawBatch::new(rows))
    }
}

fn parse_csv(body: &str) -> Result<Vec<RawRow>, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FetchError::Payload(e.to_string()))?
        .clone();
    let ts_col = headers
        .iter()
        .position(|h| h == TIMESTAMP_COLUMN)
        .ok_or_else(|| FetchError::Payload(format!("missing '{TIMESTAMP_COLUMN}' column")))?;
    let columns: Vec<(usize, &str, Option<String>)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_col)
        .map(|(i, h)| (i, h, unit_from_header(h)))
        .collect();

    let mut rows = vec![];
    for record in reader.records() {
        let record = record.map_err(|e| FetchError::Payload(e.to_string()))?;
        let raw_ts = record.get(ts_col).unwrap_or_default();
        let timestamp = raw_ts
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| FetchError::Payload(format!("invalid timestamp '{raw_ts}'")))?;

        let channels = columns
            .iter()
            .filter_map(|(i, name, unit)| {
                let value = record.get(*i)?.parse::<f64>().ok()?;
                Some(ChannelValue {
                    name: name.to_string(),
                    unit: unit.clone(),
                    value,
                })
            })
            .collect();
        rows.push(RawRow {
            timestamp,
            channels,
        });
    }
    Ok(rows)
}

/// `"Usage [kW]"` -> `Some("kW")`
fn unit_from_header(header: &str) -> Option<String> {
    let open = header.rfind('[')?;
    let close = header[open..].find(']')? + open;
    Some(header[open + 1..close].trim().to_string()).filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone, Utc};
    use mockito::Matcher;

    use crate::interfaces::http::build_agent;
    use crate::models::{Sensor, SourceType, Window};
    use crate::testing::NoStoredReadings;

    const SAMPLE_CSV: &str = "\"Date & Time\",\"Usage [kW]\",\"Generation [kW]\"\n\
        1517515380,1.25,0.5\n\
        1517515320,1.5,0.25\n\
        1517515260,2.0,\n";

    fn sensor() -> Sensor {
        Sensor {
            purpose_id: 1,
            source_type: SourceType::Egauge,
            query_string: "egauge31871".into(),
            channel: Some("Usage [kW]".into()),
            unit: "kW".into(),
            is_active: true,
            note: None,
        }
    }

    fn window() -> Window {
        // 2018-02-01T20:00Z .. 20:05Z
        let start = Utc.with_ymd_and_hms(2018, 2, 1, 20, 0, 0).unwrap();
        Window::new(start, start + Duration::minutes(5)).unwrap()
    }

    fn source(url: &str) -> MeterApiSource {
        let agent = build_agent(std::time::Duration::from_secs(5)).unwrap();
        MeterApiSource::new(agent, url, Granularity::Minute)
    }

    #[test]
    fn parses_units_from_headers() {
        assert_eq!(unit_from_header("Usage [kW]"), Some("kW".into()));
        assert_eq!(unit_from_header("Grid"), None);
        assert_eq!(unit_from_header("Odd []"), None);
    }

    #[test]
    fn csv_rows_are_sorted_ascending() {
        let batch = RawBatch::new(parse_csv(SAMPLE_CSV).unwrap());
        let ts: Vec<i64> = batch.rows().iter().map(|r| r.timestamp.timestamp()).collect();
        assert_eq!(ts, vec![1517515260, 1517515320, 1517515380]);
        // empty cell is skipped rather than failing the row
        assert_eq!(batch.rows()[0].channels.len(), 1);
        assert_eq!(batch.rows()[2].channel("Generation [kW]").unwrap().value, 0.5);
        assert_eq!(
            batch.rows()[2].channel("Usage [kW]").unwrap().unit.as_deref(),
            Some("kW")
        );
    }

    #[test]
    fn bad_timestamp_is_a_payload_error() {
        let res = parse_csv("\"Date & Time\",\"Usage [kW]\"\nyesterday,1.0\n");
        assert!(matches!(res, Err(FetchError::Payload(_))));
        let res = parse_csv("\"When\",\"Usage [kW]\"\n1517515260,1.0\n");
        assert!(matches!(res, Err(FetchError::Payload(_))));
    }

    #[test]
    fn fetch_requests_window_and_parses_response() {
        let mut server = mockito::Server::new();
        let w = window();
        let mock = server
            .mock("GET", "/cgi-bin/egauge-show")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("m".into(), "".into()),
                Matcher::UrlEncoded("c".into(), "".into()),
                Matcher::UrlEncoded("t".into(), w.start().timestamp().to_string()),
                Matcher::UrlEncoded("f".into(), (w.end().timestamp() - 1).to_string()),
            ]))
            .with_status(200)
            .with_body(SAMPLE_CSV)
            .expect(1)
            .create();

        let sensor = sensor();
        let batch = source(&server.url())
            .fetch(&FetchRequest {
                sensor: &sensor,
                window: w,
                stored: &NoStoredReadings,
            })
            .unwrap();

        mock.assert();
        assert_eq!(batch.len(), 3);
        assert!(batch.rows().iter().all(|r| w.contains(r.timestamp)));
    }

    #[test]
    fn rows_outside_window_are_dropped() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/cgi-bin/egauge-show")
            .match_query(Matcher::Any)
            .with_body("\"Date & Time\",\"Usage [kW]\"\n1517515500,1.0\n1517515260,2.0\n1517515140,3.0\n")
            .create();

        let sensor = sensor();
        let batch = source(&server.url())
            .fetch(&FetchRequest {
                sensor: &sensor,
                window: window(),
                stored: &NoStoredReadings,
            })
            .unwrap();
        // 20:05:00 is the exclusive end, 19:59:00 precedes the start
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].timestamp.timestamp(), 1517515260);
    }

    #[test]
    fn non_2xx_keeps_upstream_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/cgi-bin/egauge-show")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("device offline")
            .create();

        let sensor = sensor();
        let err = source(&server.url())
            .fetch(&FetchRequest {
                sensor: &sensor,
                window: window(),
                stored: &NoStoredReadings,
            })
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("device offline"));
    }

    #[test]
    fn stalled_response_times_out_as_transport_error() {
        use crate::ingest::{run_cycle, CycleContext, CycleError};
        use crate::testing::{at, seeded_store, sensor as test_sensor};

        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/cgi-bin/egauge-show")
            .match_query(Matcher::Any)
            .with_chunked_body(|w| {
                w.write_all(b"\"Date & Time\",\"Usage [kW]\"\n")?;
                std::thread::sleep(std::time::Duration::from_secs(3));
                w.write_all(b"1560551760,1.0\n")
            })
            .create();

        let agent = build_agent(std::time::Duration::from_secs(1)).unwrap();
        let source = MeterApiSource::new(agent, &server.url(), Granularity::Minute);
        let mut store = seeded_store();
        let started = std::time::Instant::now();
        let err = run_cycle(
            &mut store,
            &source,
            &test_sensor(1, SourceType::Egauge),
            CycleContext {
                now: at(600),
                tick: Duration::seconds(60),
            },
        )
        .unwrap_err();

        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert!(matches!(err, CycleError::Fetch(FetchError::Transport(_))));
        let logged = &store.db().attempts(1, 10).unwrap()[0];
        assert_eq!(
            (logged.pipeline_stage.as_str(), logged.status.as_str()),
            ("data_acquisition", "failure")
        );
        assert_eq!(store.db().reading_count(1).unwrap(), 0);
    }

    #[test]
    fn device_name_is_substituted_into_template() {
        let agent = build_agent(std::time::Duration::from_secs(5)).unwrap();
        let source = MeterApiSource::new(agent, "http://{device}.egaug.es/", Granularity::Hour);
        assert_eq!(
            source.show_url("egauge725"),
            "http://egauge725.egaug.es/cgi-bin/egauge-show?h&c"
        );
    }
}
