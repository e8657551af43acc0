use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use thiserror::Error;
use url::Url;

use crate::constants::{defaults, envvars};
use crate::readers::egauge::Granularity;
use crate::readers::webctrl::Credentials;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{present} is set but {missing} is not")]
    Incomplete {
        present: &'static str,
        missing: &'static str,
    },
}

/// Runtime settings, read from the environment (and `.env`)
#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub db_path: PathBuf,
    /// Lookback step added to a watermark to form the next window start
    pub tick: chrono::Duration,
    pub http_timeout: std::time::Duration,
    pub egauge_url_template: String,
    pub egauge_granularity: Granularity,
    pub webctrl_url: String,
    pub webctrl_credentials: Option<Credentials>,
    pub site_timezone: Tz,
    pub hobo_drop_dir: PathBuf,
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = var(envvars::DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::DATA_DIR));

        let tick_seconds = positive_seconds(envvars::TICK_SECONDS, defaults::TICK_SECONDS)?;
        let timeout_seconds =
            positive_seconds(envvars::HTTP_TIMEOUT_SECONDS, defaults::HTTP_TIMEOUT_SECONDS)?;

        let egauge_url_template =
            var(envvars::EGAUGE_URL_TEMPLATE).unwrap_or_else(|| defaults::EGAUGE_URL_TEMPLATE.into());
        // the template only becomes a URL once a device name is put in
        check_url(
            envvars::EGAUGE_URL_TEMPLATE,
            &egauge_url_template.replace("{device}", "device"),
        )?;

        let webctrl_url = var(envvars::WEBCTRL_URL).unwrap_or_else(|| defaults::WEBCTRL_URL.into());
        check_url(envvars::WEBCTRL_URL, &webctrl_url)?;

        Ok(PollerConfig {
            db_path: var(envvars::DB_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(defaults::DB_FILE)),
            tick: chrono::Duration::seconds(tick_seconds as i64),
            http_timeout: std::time::Duration::from_secs(timeout_seconds),
            egauge_url_template,
            egauge_granularity: parse_var(envvars::EGAUGE_GRANULARITY, defaults::EGAUGE_GRANULARITY)?,
            webctrl_url,
            webctrl_credentials: credentials()?,
            site_timezone: parse_var(envvars::SITE_TIMEZONE, defaults::SITE_TIMEZONE)?,
            hobo_drop_dir: var(envvars::HOBO_DROP_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(defaults::HOBO_DROP_SUBDIR)),
        })
    }
}

/// Set and non-empty
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let value = var(name).unwrap_or_else(|| default.to_string());
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: name,
        value: value.clone(),
        reason: e.to_string(),
    })
}

fn positive_seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let seconds: u64 = parse_var(name, &default.to_string())?;
    if seconds == 0 {
        return Err(ConfigError::Invalid {
            var: name,
            value: seconds.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(seconds)
}

fn check_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid {
            var: name,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn credentials() -> Result<Option<Credentials>, ConfigError> {
    match (var(envvars::WEBCTRL_USER), var(envvars::WEBCTRL_PASSWORD)) {
        (Some(username), Some(password)) => Ok(Some(Credentials { username, password })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Incomplete {
            present: envvars::WEBCTRL_USER,
            missing: envvars::WEBCTRL_PASSWORD,
        }),
        (None, Some(_)) => Err(ConfigError::Incomplete {
            present: envvars::WEBCTRL_PASSWORD,
            missing: envvars::WEBCTRL_USER,
        }),
    }
}
