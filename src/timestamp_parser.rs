use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Handles parsing timestamps from the text fields of listings and bulk exports
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>
    /// Handles RFC 3339 (with `Z` or an offset), naive datetimes, bare dates and
    /// integer epoch seconds
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>, String> {
        let timestamp = timestamp_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
            return Ok(dt.with_timezone(&Utc));
        }

        // Naive datetimes are taken as UTC
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(timestamp, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }

        if let Ok(secs) = timestamp.parse::<i64>() {
            if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
                return Ok(dt);
            }
        }

        Err(format!("unrecognised timestamp {timestamp_str:?}"))
    }

    /// Parse a display timezone: `UTC`, `Z`, or a fixed `+HH:MM` / `-HH:MM` offset
    pub fn parse_offset(offset_str: &str) -> Option<FixedOffset> {
        let offset = offset_str.trim();
        if offset.eq_ignore_ascii_case("utc") || offset == "Z" {
            return FixedOffset::east_opt(0);
        }

        let (sign, rest) = match offset.as_bytes().first()? {
            b'+' => (1, &offset[1..]),
            b'-' => (-1, &offset[1..]),
            _ => return None,
        };
        let (hours, minutes) = rest.split_once(':')?;
        if hours.len() != 2 || minutes.len() != 2 {
            return None;
        }
        let hours: i32 = hours.parse().ok()?;
        let minutes: i32 = minutes.parse().ok()?;
        if hours > 23 || minutes > 59 {
            return None;
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
    }
}
