use chrono::{DateTime, SubsecRound, Utc};
use std::time::SystemTime;

/// Current time, truncated to whole seconds
pub fn now_utc() -> DateTime<Utc> {
    let now: DateTime<Utc> = SystemTime::now().into();
    now.trunc_subsecs(0)
}

/// RFC 3339 timestamp in any offset, as UTC
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s.trim()).map(|t| t.with_timezone(&Utc))
}
