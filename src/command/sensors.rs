use anyhow::{anyhow, Context, Result};

use crate::argsets::{AddSensorArgs, AttemptsArgs, SetWatermarkArgs};
use crate::config::PollerConfig;
use crate::constants::defaults;
use crate::helpers::parse_instant;
use crate::interfaces::{SqliteStore, Store};
use crate::models::Sensor;

fn open_store() -> Result<SqliteStore> {
    let config = PollerConfig::from_env()?;
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("cannot open {}", config.db_path.display()))
}

pub fn add_sensor(args: AddSensorArgs) -> Result<()> {
    let sensor: Sensor = serde_json::from_str(&args.json).context("invalid sensor JSON")?;
    let watermark = args
        .watermark
        .as_deref()
        .map(parse_instant)
        .transpose()
        .context("invalid watermark")?;

    open_store()?.add_sensor(&sensor, watermark)?;
    log::info!(
        "Added {} sensor {} ({})",
        sensor.source_type,
        sensor.purpose_id,
        sensor.query_string
    );
    if watermark.is_none() {
        log::warn!(
            "Sensor {} has no watermark and will fail until one is set",
            sensor.purpose_id
        );
    }
    Ok(())
}

pub fn set_watermark(args: SetWatermarkArgs) -> Result<()> {
    let watermark = parse_instant(&args.watermark).context("invalid watermark")?;
    let store = open_store()?;
    let previous = store.watermark(args.purpose_id)?;
    store.set_watermark(args.purpose_id, watermark)?;
    match previous {
        Some(previous) => log::info!(
            "Watermark of sensor {} moved from {previous} to {watermark}",
            args.purpose_id
        ),
        None => log::info!("Watermark of sensor {} set to {watermark}", args.purpose_id),
    }
    Ok(())
}

/// Prints the sensor's state and its latest attempt-log entries, newest first
pub fn attempts(args: AttemptsArgs) -> Result<()> {
    let store = open_store()?;
    let sensor = store
        .db()
        .sensor(args.purpose_id)?
        .ok_or_else(|| anyhow!("No sensor with purpose id {}", args.purpose_id))?;

    println!(
        "sensor {} ({} {}): {} readings, watermark {}",
        sensor.purpose_id,
        sensor.source_type,
        sensor.query_string,
        store.db().reading_count(sensor.purpose_id)?,
        sensor
            .last_updated
            .map_or_else(|| "unset".to_string(), |w| w.to_rfc3339())
    );
    let limit = args.limit.unwrap_or(defaults::ATTEMPTS_LIMIT);
    for attempt in store.db().attempts(args.purpose_id, limit)? {
        println!(
            "{}\t{}\t{}\t{}",
            attempt.attempt_time.to_rfc3339(),
            attempt.pipeline_stage,
            attempt.status,
            attempt.detail.unwrap_or_default()
        );
    }
    Ok(())
}
