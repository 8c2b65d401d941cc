//! Date arithmetic and formatting for the `dayjs` shim.
//!
//! Instants cross the bridge as epoch milliseconds. Calendar math and
//! formatting happen at a fixed UTC offset, normally the host's local one.

use chrono::{
    DateTime, Datelike, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc,
};

use crate::error::PluginError;

/// Format tokens, longest first so `YYYY` wins over `YY`.
const TOKENS: [&str; 20] = [
    "YYYY", "SSS", "YY", "MM", "DD", "HH", "hh", "mm", "ss", "ZZ", "M", "D", "H", "h", "m", "s",
    "A", "a", "d", "Z",
];

pub const DEFAULT_FORMAT: &str = "YYYY-MM-DDTHH:mm:ssZ";

/// The host's UTC offset at `millis`.
pub fn local_offset(millis: i64) -> FixedOffset {
    match Local.timestamp_millis_opt(millis).single() {
        Some(dt) => *dt.offset(),
        None => Utc.fix(),
    }
}

fn at_offset(millis: i64, offset: FixedOffset) -> Result<DateTime<FixedOffset>, PluginError> {
    offset
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PluginError::Execution(format!("timestamp out of range: {millis}")))
}

fn offset_text(offset: FixedOffset, colon: bool) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let mins = secs.abs() / 60;
    if colon {
        format!("{sign}{:02}:{:02}", mins / 60, mins % 60)
    } else {
        format!("{sign}{:02}{:02}", mins / 60, mins % 60)
    }
}

/// dayjs-style `format`. Text inside `[...]` is copied verbatim.
pub fn format(millis: i64, pattern: &str, offset: FixedOffset) -> Result<String, PluginError> {
    let dt = at_offset(millis, offset)?;
    let pattern = if pattern.is_empty() { DEFAULT_FORMAT } else { pattern };
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;

    while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end]);
                rest = &rest[end + 1..];
                continue;
            }
        }
        let Some(token) = TOKENS.iter().find(|t| rest.starts_with(**t)) else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        };
        let hour12 = match dt.hour() % 12 {
            0 => 12,
            h => h,
        };
        let piece = match *token {
            "YYYY" => format!("{:04}", dt.year()),
            "YY" => format!("{:02}", dt.year().rem_euclid(100)),
            "MM" => format!("{:02}", dt.month()),
            "M" => dt.month().to_string(),
            "DD" => format!("{:02}", dt.day()),
            "D" => dt.day().to_string(),
            "HH" => format!("{:02}", dt.hour()),
            "H" => dt.hour().to_string(),
            "hh" => format!("{hour12:02}"),
            "h" => hour12.to_string(),
            "mm" => format!("{:02}", dt.minute()),
            "m" => dt.minute().to_string(),
            "ss" => format!("{:02}", dt.second()),
            "s" => dt.second().to_string(),
            "SSS" => format!("{:03}", dt.timestamp_subsec_millis()),
            "A" => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
            "a" => (if dt.hour() < 12 { "am" } else { "pm" }).to_string(),
            "d" => dt.weekday().num_days_from_sunday().to_string(),
            "Z" => offset_text(offset, true),
            _ => offset_text(offset, false),
        };
        out.push_str(&piece);
        rest = &rest[token.len()..];
    }
    Ok(out)
}

/// Parse the date strings plugins commonly hand to `dayjs(...)`.
///
/// Strings without an offset are read in `offset`.
pub fn parse(text: &str, offset: FixedOffset) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.timestamp_millis());
    }
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}

/// `add(amount, unit)`; negative amounts subtract.
pub fn add(millis: i64, amount: i64, unit: &str, offset: FixedOffset) -> Result<i64, PluginError> {
    let fixed = |ms_per_unit: i64| {
        amount
            .checked_mul(ms_per_unit)
            .and_then(|d| millis.checked_add(d))
            .ok_or_else(|| PluginError::Execution("date arithmetic overflow".into()))
    };
    match unit {
        "ms" | "millisecond" | "milliseconds" => fixed(1),
        "s" | "second" | "seconds" => fixed(1_000),
        "m" | "minute" | "minutes" => fixed(60_000),
        "h" | "hour" | "hours" => fixed(3_600_000),
        "d" | "day" | "days" => fixed(86_400_000),
        "w" | "week" | "weeks" => fixed(7 * 86_400_000),
        "M" | "month" | "months" => add_months(millis, amount, offset),
        "y" | "year" | "years" => add_months(millis, amount.saturating_mul(12), offset),
        other => Err(PluginError::Unsupported(format!("dayjs unit '{other}'"))),
    }
}

fn add_months(millis: i64, months: i64, offset: FixedOffset) -> Result<i64, PluginError> {
    let dt = at_offset(millis, offset)?;
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).unwrap_or(u32::MAX));
    let shifted = if months >= 0 {
        dt.checked_add_months(magnitude)
    } else {
        dt.checked_sub_months(magnitude)
    };
    shifted
        .map(|d| d.timestamp_millis())
        .ok_or_else(|| PluginError::Execution("date arithmetic overflow".into()))
}

/// Milliseconds since the epoch, now.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    // 2024-02-29T15:04:05.007+08:00
    const LEAP: i64 = 1_709_190_245_007;

    #[test]
    fn test_format_tokens() {
        assert_eq!(format(LEAP, "YYYY-MM-DD HH:mm:ss.SSS", cst()).unwrap(), "2024-02-29 15:04:05.007");
        assert_eq!(format(LEAP, "YY/M/D h:m A", cst()).unwrap(), "24/2/29 3:4 PM");
        assert_eq!(format(LEAP, "[Today is] d Z", cst()).unwrap(), "Today is 4 +08:00");
        assert_eq!(format(LEAP, "ZZ", cst()).unwrap(), "+0800");
    }

    #[test]
    fn test_default_format() {
        assert_eq!(format(LEAP, "", cst()).unwrap(), "2024-02-29T15:04:05+08:00");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse("2024-02-29T15:04:05.007+08:00", cst()), Some(LEAP));
        assert_eq!(parse("2024-02-29 15:04:05", cst()), Some(LEAP - 7));
        assert_eq!(parse("2024/02/29", cst()), Some(LEAP - 7 - (15 * 3600 + 4 * 60 + 5) * 1000));
        assert_eq!(parse("not a date", cst()), None);
    }

    #[test]
    fn test_add_units() {
        assert_eq!(add(0, 2, "h", cst()).unwrap(), 7_200_000);
        assert_eq!(add(0, -1, "day", cst()).unwrap(), -86_400_000);
        let next_year = add(LEAP, 1, "y", cst()).unwrap();
        assert_eq!(format(next_year, "YYYY-MM-DD", cst()).unwrap(), "2025-02-28");
        let prev_month = add(LEAP, -1, "month", cst()).unwrap();
        assert_eq!(format(prev_month, "YYYY-MM-DD", cst()).unwrap(), "2024-01-29");
        assert!(add(0, 1, "fortnight", cst()).is_err());
    }
}
