use crate::domain::models::StatsPeriod;
use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};

/// Current UTC time at whole-second precision, so stored timestamps share one
/// text layout and compare correctly as strings in SQLite.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn period_start(period: StatsPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        StatsPeriod::Today => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now),
        StatsPeriod::Week => now - Duration::days(7),
        StatsPeriod::Month => now - Duration::days(30),
    }
}

/// Parses a stored or imported timestamp: RFC 3339, or a naive ISO datetime
/// (with or without fractional seconds) taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.format("%d.%m.%Y").to_string()
}
