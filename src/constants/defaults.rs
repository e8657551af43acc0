pub const LOG_LEVEL: &str = "INFO";

pub const DATA_DIR: &str = "./data";
pub const DB_FILE: &str = "readings.db";
pub const HOBO_DROP_SUBDIR: &str = "to-insert";

pub const TICK_SECONDS: u64 = 60;
pub const HTTP_TIMEOUT_SECONDS: u64 = 60;

pub const EGAUGE_URL_TEMPLATE: &str = "http://{device}.egaug.es";
pub const EGAUGE_GRANULARITY: &str = "m";

pub const WEBCTRL_URL: &str = "http://www.soest.hawaii.edu/hneienergy/bulktrendserver/read";

pub const SITE_TIMEZONE: &str = "Pacific/Honolulu";

/// Attempt log rows shown by `attempts` when no limit is given
pub const ATTEMPTS_LIMIT: usize = 20;
