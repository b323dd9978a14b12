//! Birth date validation.
//!
//! Accepts exactly `DD.MM.YYYY` (ASCII digits, `.` delimiter) naming a real
//! Gregorian calendar date. Anything else, including non-padded parts or
//! other separators, is rejected.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Format shown to users in prompts and re-prompts.
pub const DATE_FORMAT_HINT: &str = "ДД.ММ.ГГГГ";

/// Example date used in instructions.
pub const DATE_EXAMPLE: &str = "14.11.2003";

static DATE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([0-9]{2})\.([0-9]{2})\.([0-9]{4})$").ok());

/// Parse a trimmed `DD.MM.YYYY` string into a calendar date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let re = DATE_RE.as_ref()?;
    let caps = re.captures(text.trim())?;

    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;

    if year == 0 {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whether `text` is a well-formed, real `DD.MM.YYYY` date.
pub fn is_valid_date(text: &str) -> bool {
    parse_date(text).is_some()
}
