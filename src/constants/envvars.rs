pub const LOG_LEVEL: &str = "LOGGING_LEVEL";

pub const DATA_DIR: &str = "SI_DATA_DIR";
pub const DB_PATH: &str = "SI_DB_PATH";

pub const TICK_SECONDS: &str = "SI_TICK_SECONDS";
pub const HTTP_TIMEOUT_SECONDS: &str = "SI_HTTP_TIMEOUT_SECONDS";

pub const EGAUGE_URL_TEMPLATE: &str = "SI_EGAUGE_URL_TEMPLATE";
pub const EGAUGE_GRANULARITY: &str = "SI_EGAUGE_GRANULARITY";

pub const WEBCTRL_URL: &str = "SI_WEBCTRL_URL";
pub const WEBCTRL_USER: &str = "SI_WEBCTRL_USER";
pub const WEBCTRL_PASSWORD: &str = "SI_WEBCTRL_PASSWORD";

pub const SITE_TIMEZONE: &str = "SI_SITE_TIMEZONE";
pub const HOBO_DROP_DIR: &str = "SI_HOBO_DROP_DIR";
