use std::fs;

use anyhow::{Context, Result};
use readingdb::{ReadingDb, CURRENT_SCHEMA_VERSION};

use crate::config::PollerConfig;

pub fn init_db() -> Result<()> {
    let config = PollerConfig::from_env()?;

    ReadingDb::create(&config.db_path)
        .with_context(|| format!("cannot initialise {}", config.db_path.display()))?;
    log::info!(
        "Reading database at {} is at schema version {CURRENT_SCHEMA_VERSION}",
        config.db_path.display()
    );

    fs::create_dir_all(&config.hobo_drop_dir)
        .with_context(|| format!("cannot create {}", config.hobo_drop_dir.display()))?;
    log::info!("HOBO exports are read from {}", config.hobo_drop_dir.display());

    Ok(())
}
