use std::fmt;

use serde::{Deserialize, Serialize};

/// Every bookable slot is exactly this long.
pub const SLOT_MINUTES: u16 = 60;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day as minutes since midnight. Parsed from and rendered
/// as strict 24-hour `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    /// Parse `HH:MM` with two-digit fields, hours `00`–`23`, minutes `00`–`59`.
    /// No surrounding whitespace, no single-digit hours.
    pub fn parse(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() != 5 || b[2] != b':' {
            return None;
        }
        let digit = |c: u8| c.is_ascii_digit().then(|| u16::from(c - b'0'));
        let hours = digit(b[0])? * 10 + digit(b[1])?;
        let minutes = digit(b[3])? * 10 + digit(b[4])?;
        if hours > 23 || minutes > 59 {
            return None;
        }
        Some(Self(hours * 60 + minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// A fixed one-hour window `[start, end)`. Ordered by start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl Slot {
    /// Build a slot from two parsed times; `None` unless exactly `SLOT_MINUTES` apart.
    pub fn from_bounds(start: ClockTime, end: ClockTime) -> Option<Self> {
        (end.minutes() >= start.minutes() && end.minutes() - start.minutes() == SLOT_MINUTES)
            .then_some(Self { start, end })
    }

    /// Parse both ends as `HH:MM` and require the fixed slot width.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Self::from_bounds(ClockTime::parse(start)?, ClockTime::parse(end)?)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Tile `[open, close)` into consecutive one-hour slots.
///
/// Returns `None` when either bound is malformed or `open >= close`. A trailing
/// remainder shorter than one slot is dropped, so a window narrower than an
/// hour yields an empty schedule rather than an error.
pub fn derive_slots(open_time: &str, close_time: &str) -> Option<Vec<Slot>> {
    let open = ClockTime::parse(open_time)?;
    let close = ClockTime::parse(close_time)?;
    if open >= close {
        return None;
    }

    let mut slots = Vec::new();
    let mut start = open.minutes();
    while start + SLOT_MINUTES <= close.minutes() {
        // Both bounds are <= close < 24:00, so from_minutes cannot fail here.
        if let (Some(s), Some(e)) = (
            ClockTime::from_minutes(start),
            ClockTime::from_minutes(start + SLOT_MINUTES),
        ) {
            slots.push(Slot { start: s, end: e });
        }
        start += SLOT_MINUTES;
    }
    Some(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_accepts_strict_format() {
        assert_eq!(ClockTime::parse("00:00").unwrap().minutes(), 0);
        assert_eq!(ClockTime::parse("09:30").unwrap().minutes(), 570);
        assert_eq!(ClockTime::parse("23:59").unwrap().minutes(), 1439);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["9:00", "25:00", "24:00", "12:60", "12-00", "1200", " 09:00", "09:00 ", "", "ab:cd", "+9:00"] {
            assert!(ClockTime::parse(bad).is_none(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn display_zero_pads() {
        assert_eq!(ClockTime::from_minutes(65).unwrap().to_string(), "01:05");
        assert!(ClockTime::from_minutes(1440).is_none());
    }

    #[test]
    fn tiles_three_hour_window() {
        let slots = derive_slots("09:00", "12:00").unwrap();
        assert_eq!(labels(&slots), vec!["09:00-10:00", "10:00-11:00", "11:00-12:00"]);
    }

    #[test]
    fn drops_trailing_remainder() {
        let slots = derive_slots("09:15", "11:45").unwrap();
        assert_eq!(labels(&slots), vec!["09:15-10:15", "10:15-11:15"]);
    }

    #[test]
    fn narrow_window_is_empty_not_error() {
        assert_eq!(derive_slots("09:00", "09:30"), Some(vec![]));
    }

    #[test]
    fn inverted_or_equal_window_is_none() {
        assert_eq!(derive_slots("10:00", "09:00"), None);
        assert_eq!(derive_slots("10:00", "10:00"), None);
    }

    #[test]
    fn malformed_bounds_are_none() {
        assert_eq!(derive_slots("9:00", "12:00"), None);
        assert_eq!(derive_slots("25:00", "12:00"), None);
        assert_eq!(derive_slots("09:00", "noon"), None);
    }

    #[test]
    fn last_slot_can_end_at_2359_boundary() {
        let slots = derive_slots("21:59", "23:59").unwrap();
        assert_eq!(labels(&slots), vec!["21:59-22:59", "22:59-23:59"]);
    }

    #[test]
    fn slot_parse_requires_one_hour() {
        assert!(Slot::parse("09:00", "10:00").is_some());
        assert!(Slot::parse("09:00", "09:30").is_none());
        assert!(Slot::parse("10:00", "09:00").is_none());
        assert!(Slot::parse("09:00", "11:00").is_none());
        assert!(Slot::parse("9:00", "10:00").is_none());
    }
}
