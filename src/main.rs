use anyhow::{anyhow, Result};
use env_logger::Env;

use sensor_ingest::argsets::{AddSensorArgs, AttemptsArgs, SetWatermarkArgs};
use sensor_ingest::command;
use sensor_ingest::constants::{defaults, envvars};
use sensor_ingest::helpers::load_dotenv;

const CMD_RUN: &str = "run";
const CMD_INIT_DB: &str = "init-db";
const CMD_ADD_SENSOR: &str = "add-sensor";
const CMD_SET_WATERMARK: &str = "set-watermark";
const CMD_ATTEMPTS: &str = "attempts";

fn main() -> Result<()> {
    load_dotenv();
    env_logger::Builder::from_env(Env::default().filter_or(envvars::LOG_LEVEL, defaults::LOG_LEVEL))
        .init();

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        None | Some(CMD_RUN) => command::run(),
        Some(CMD_INIT_DB) => command::init_db(),
        Some(CMD_ADD_SENSOR) => command::add_sensor(AddSensorArgs {
            watermark: args.opt_value_from_str("--watermark")?,
            json: args.free_from_str()?,
        }),
        Some(CMD_SET_WATERMARK) => command::set_watermark(SetWatermarkArgs {
            purpose_id: args.free_from_str()?,
            watermark: args.free_from_str()?,
        }),
        Some(CMD_ATTEMPTS) => command::attempts(AttemptsArgs {
            purpose_id: args.free_from_str()?,
            limit: args.opt_free_from_str()?,
        }),
        Some(other) => Err(anyhow!(
            "Unknown subcommand '{other}'; must be one of 'run', 'init-db', 'add-sensor', 'set-watermark', 'attempts'"
        )),
    }
}
