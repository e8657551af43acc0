use anyhow::{anyhow, Context, Result};

use crate::config::PollerConfig;
use crate::helpers::now_utc;
use crate::ingest::run_pass;
use crate::interfaces::SqliteStore;
use crate::readers::SourceClients;

/// One ingestion pass. Fails if any sensor failed.
pub fn run() -> Result<()> {
    let config = PollerConfig::from_env()?;
    let mut store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("cannot open {}", config.db_path.display()))?;
    let sources = SourceClients::from_config(&config)?;

    let report = run_pass(&mut store, &sources, now_utc(), config.tick)?;
    if !report.is_success() {
        return Err(anyhow!(
            "{} of {} sensors failed",
            report.failures(),
            report.results.len()
        ));
    }
    Ok(())
}
