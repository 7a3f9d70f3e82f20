//! Time helpers: human readable ages and modem timestamp parsing.

use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{ParseError, ParseResult};

/// Render the time elapsed between `then` and `now` as "12s ago", "3m ago", etc.
///
/// Future instants (clock skew between device and relay) render as "just now".
///
/// # Examples
///
/// ```
/// use time::{Duration, OffsetDateTime};
/// use tracker_types::humanize_age;
///
/// let now = OffsetDateTime::now_utc();
/// assert_eq!(humanize_age(now - Duration::minutes(5), now), "5m ago");
/// assert_eq!(humanize_age(now - Duration::hours(50), now), "2d ago");
/// ```
pub fn humanize_age(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let secs = (now - then).whole_seconds();
    match secs {
        s if s <= 0 => "just now".to_string(),
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

/// Parse a timestamp reported by the device.
///
/// Accepts RFC 3339, or the cellular modem clock format
/// `yy/MM/dd,HH:mm:ss±zz` where `zz` is the UTC offset in quarter hours.
///
/// # Errors
///
/// Returns [`ParseError::InvalidTimestamp`] if neither format matches.
pub fn parse_device_time(raw: &str) -> ParseResult<OffsetDateTime> {
    let raw = raw.trim().trim_matches('"');
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }
    parse_modem_time(raw).ok_or_else(|| ParseError::InvalidTimestamp(raw.to_string()))
}

const MAX_ZONE_QUARTERS: i32 = 24 * 4;

fn parse_modem_time(raw: &str) -> Option<OffsetDateTime> {
    let (date_part, rest) = raw.split_once(',')?;
    // Offset sign is the last '+' or '-' in the time part.
    let sign_pos = rest.rfind(['+', '-'])?;
    let (time_part, zone_part) = rest.split_at(sign_pos);

    let mut date = date_part.split('/').map(|p| p.parse::<u16>().ok());
    let year = 2000 + i32::from(date.next()??);
    let month = Month::try_from(u8::try_from(date.next()??).ok()?).ok()?;
    let day = u8::try_from(date.next()??).ok()?;

    let mut clock = time_part.split(':').map(|p| p.parse::<u8>().ok());
    let hour = clock.next()??;
    let minute = clock.next()??;
    let second = clock.next()??;

    // Offsets are bounded to +-24h.
    let quarters: i32 = zone_part.parse().ok()?;
    if !(-MAX_ZONE_QUARTERS..=MAX_ZONE_QUARTERS).contains(&quarters) {
        return None;
    }
    let offset = UtcOffset::from_whole_seconds(quarters.checked_mul(15 * 60)?).ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_offset(offset))
}
