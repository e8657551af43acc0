use std::ffi::OsStr;
use std::path::Path;

use assert_cmd::{assert::Assert, Command};
use chrono::{DateTime, Duration, DurationRound, Utc};
use mockito::Matcher;
use predicates::prelude::*;
use serde_json::json;

fn cli(data_dir: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::cargo_bin("sensor-ingest").unwrap();
    cmd.env("SI_DATA_DIR", data_dir)
        .env_remove("SI_DB_PATH")
        .env_remove("SI_HOBO_DROP_DIR")
        .env("LOGGING_LEVEL", "debug");
    cmd
}

fn init_db_assert(data_dir: &Path) -> Assert {
    cli(data_dir).arg("init-db").assert()
}

fn add_egauge_sensor(data_dir: &Path, egauge_url: &str, watermark: DateTime<Utc>) {
    let sensor = json!({
        "purpose_id": 1,
        "source_type": "egauge",
        "query_string": "egauge31871",
        "channel": "Usage [kW]",
        "unit": "kW"
    });
    cli(data_dir)
        .env("SI_EGAUGE_URL_TEMPLATE", egauge_url)
        .arg("add-sensor")
        .arg("--watermark")
        .arg(watermark.to_rfc3339())
        .arg(sensor.to_string())
        .assert()
        .success();
}

fn ten_minutes_ago() -> DateTime<Utc> {
    (Utc::now() - Duration::minutes(10))
        .duration_trunc(Duration::minutes(1))
        .unwrap()
}

#[test]
fn init_db_creates_database_and_drop_dir() {
    let tempdir = tempfile::tempdir().unwrap();
    init_db_assert(tempdir.path()).success();

    assert!(tempdir.path().join("readings.db").is_file());
    assert!(tempdir.path().join("to-insert").is_dir());
    // running it again is harmless
    init_db_assert(tempdir.path()).success();
}

#[test]
fn run_before_init_fails() {
    let tempdir = tempfile::tempdir().unwrap();
    cli(tempdir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("init-db"));
}

#[test]
fn run_stores_new_meter_readings() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new();
    let watermark = ten_minutes_ago();

    let rows: String = (1..=3)
        .rev()
        .map(|m| format!("{},{}.5\n", (watermark + Duration::minutes(m)).timestamp(), m))
        .collect();
    let mock = server
        .mock("GET", "/cgi-bin/egauge-show")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded(
                "t".into(),
                (watermark + Duration::minutes(1)).timestamp().to_string(),
            ),
            Matcher::UrlEncoded("m".into(), "".into()),
        ]))
        .with_body(format!("\"Date & Time\",\"Usage [kW]\"\n{rows}"))
        .expect(1)
        .create();

    init_db_assert(tempdir.path()).success();
    add_egauge_sensor(tempdir.path(), &server.url(), watermark);

    cli(tempdir.path())
        .env("SI_EGAUGE_URL_TEMPLATE", server.url())
        .assert()
        .success();
    mock.assert();

    cli(tempdir.path())
        .arg("attempts")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 readings"))
        .stdout(predicate::str::contains(
            (watermark + Duration::minutes(3)).to_rfc3339(),
        ))
        .stdout(predicate::str::contains("database_insertion\tsuccess"))
        .stdout(predicate::str::contains("data_acquisition\tsuccess"));
}

#[test]
fn failing_sensor_fails_the_run() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/cgi-bin/egauge-show")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("bad gateway")
        .create();

    init_db_assert(tempdir.path()).success();
    add_egauge_sensor(tempdir.path(), &server.url(), ten_minutes_ago());

    cli(tempdir.path())
        .env("SI_EGAUGE_URL_TEMPLATE", server.url())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 of 1 sensors failed"));

    cli(tempdir.path())
        .args(["attempts", "1", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 readings"))
        .stdout(predicate::str::contains("data_acquisition\tfailure"))
        .stdout(predicate::str::contains("502"))
        .stdout(predicate::str::contains("database_insertion").not());
}

#[test]
fn set_watermark_moves_it_both_ways() {
    let tempdir = tempfile::tempdir().unwrap();
    init_db_assert(tempdir.path()).success();
    add_egauge_sensor(tempdir.path(), "http://{device}.egaug.es", ten_minutes_ago());

    cli(tempdir.path())
        .args(["set-watermark", "1", "2019-06-14T12:35:00-10:00"])
        .assert()
        .success();
    cli(tempdir.path())
        .args(["attempts", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("watermark 2019-06-14T22:35:00+00:00"));

    cli(tempdir.path())
        .args(["set-watermark", "1", "last tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid watermark"));
    cli(tempdir.path())
        .args(["set-watermark", "42", "2019-06-14T12:35:00Z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no sensor with purpose id 42"));
}

#[test]
fn attempts_stdout_stays_clean_with_dotenv() {
    let tempdir = tempfile::tempdir().unwrap();
    init_db_assert(tempdir.path()).success();
    add_egauge_sensor(tempdir.path(), "http://{device}.egaug.es", ten_minutes_ago());
    std::fs::write(tempdir.path().join(".env"), "SI_TICK_SECONDS=60\n").unwrap();

    cli(tempdir.path())
        .args(["attempts", "1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("sensor 1 (egauge egauge31871)"))
        .stderr(predicate::str::contains("Loaded"));
}

#[test]
fn bad_input_is_rejected() {
    let tempdir = tempfile::tempdir().unwrap();
    init_db_assert(tempdir.path()).success();

    cli(tempdir.path())
        .args(["add-sensor", r#"{"purpose_id": 1, "source_type": "modbus"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid sensor JSON"));
    cli(tempdir.path())
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown subcommand 'frobnicate'"));
    cli(tempdir.path())
        .env("SI_TICK_SECONDS", "0")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SI_TICK_SECONDS"));
}
