use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::schedule::Slot;

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Render a timestamp as RFC 3339 UTC with millisecond precision.
pub fn format_ms(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Calendar date in `YYYY-MM-DD` form. Only the shape is checked:
/// `2024-02-30` is a well-formed date as far as booking is concerned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDate(String);

impl CalendarDate {
    pub fn parse(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        let shape_ok = b.len() == 10
            && b[4] == b'-'
            && b[7] == b'-'
            && b.iter()
                .enumerate()
                .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
        shape_ok.then(|| Self(s.to_string()))
    }

    pub fn today_utc() -> Self {
        Self(Utc::now().format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mirror of an externally owned listing. Fields are kept exactly as the
/// listing service supplied them; the booking core validates them on use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub owner_id: String,
    pub open_time: String,
    pub close_time: String,
    pub slot_capacity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
        }
    }
}

/// A committed booking. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub booking_id: Ulid,
    pub listing_id: String,
    pub date: CalendarDate,
    pub slot: Slot,
    pub guest_count: u32,
    pub user_id: String,
    pub user_name: String,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

impl Reservation {
    pub fn day_key(&self) -> DayKey {
        DayKey::new(self.listing_id.clone(), self.date.clone())
    }

    /// Composite `listingId#date` grouping key.
    pub fn listing_date(&self) -> String {
        format!("{}#{}", self.listing_id, self.date)
    }

    /// Position in a day ledger's index order.
    pub fn index_key(&self) -> (Slot, Ulid) {
        (self.slot, self.booking_id)
    }
}

/// Grouping key for all reservations of one listing on one date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub listing_id: String,
    pub date: CalendarDate,
}

impl DayKey {
    pub fn new(listing_id: String, date: CalendarDate) -> Self {
        Self { listing_id, date }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.listing_id, self.date)
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// A booking request as received, before any validation. `guest_count` is
/// `None` when the caller sent something that is not an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub listing_id: String,
    pub date: String,
    pub slot_start: String,
    pub slot_end: String,
    pub guest_count: Option<i64>,
}

/// Caller identity, already verified by the connection's authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub user_id: String,
    pub user_name: String,
}

/// Who is writing to the listing mirror. Listings belong to the external
/// listing service; guests and hosts only ever read them here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingWriter<'a> {
    Service,
    User(&'a str),
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ListingUpserted {
        listing: Listing,
    },
    ListingRemoved {
        id: String,
    },
    ReservationCommitted {
        reservation: Reservation,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot: Slot,
    pub booked: u32,
    pub remaining: u32,
    pub is_full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub listing_id: String,
    pub date: CalendarDate,
    pub slot_capacity: u32,
    pub slots: Vec<SlotAvailability>,
}

/// One of the caller's reservations with its listing as currently mirrored.
/// `listing` is `None` once the listing has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingWithListing {
    pub reservation: Reservation,
    pub listing: Option<Listing>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPage {
    pub listing_id: String,
    pub date: CalendarDate,
    pub items: Vec<Reservation>,
    pub next_cursor: Option<String>,
}
