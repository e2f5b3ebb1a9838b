use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{AttendanceError, Result};

/// A calendar day in the canonical timezone, as a half-open UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(date: NaiveDate, offset: FixedOffset) -> Self {
        let midnight = date.and_time(NaiveTime::MIN);
        let start = offset
            .from_local_datetime(&midnight)
            .single()
            .map(|local| local.with_timezone(&Utc))
            // A fixed offset has no gaps or folds; this branch is unreachable in practice.
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
        Self {
            date,
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AttendanceError::InvalidParameter(format!("date '{value}' is not YYYY-MM-DD"))
    })
}

/// Parses `+05:30`, `-0800`, `Z` or `UTC` into a fixed offset.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let trimmed = value.trim();
    let invalid =
        || AttendanceError::InvalidParameter(format!("'{value}' is not a UTC offset like +05:30"));

    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

pub fn today(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_shifts_with_offset() {
        let ist = parse_utc_offset("+05:30").unwrap();
        let window = DayWindow::new(date(2024, 1, 10), ist);
        assert_eq!(window.start.to_rfc3339(), "2024-01-09T18:30:00+00:00");
        assert_eq!(window.end.to_rfc3339(), "2024-01-10T18:30:00+00:00");
    }

    #[test]
    fn window_is_half_open() {
        let utc = parse_utc_offset("Z").unwrap();
        let window = DayWindow::new(date(2024, 1, 10), utc);
        assert!(window.contains(&window.start));
        assert!(!window.contains(&window.end));
        assert!(window.contains(&(window.end - Duration::seconds(1))));
    }

    #[test]
    fn offsets_parse_in_common_forms() {
        assert_eq!(parse_utc_offset("-0800").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("+5").is_err());
    }

    #[test]
    fn dates_must_be_iso() {
        assert_eq!(parse_date("2024-01-10").unwrap(), date(2024, 1, 10));
        assert!(matches!(
            parse_date("10/01/2024"),
            Err(AttendanceError::InvalidParameter(_))
        ));
    }
}
