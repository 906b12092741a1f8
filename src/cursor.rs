//! Continuation tokens for paginated roster reads.
//!
//! A cursor names the last reservation returned; the next page starts strictly
//! after it in ledger index order `(slot_start, booking_id)`. Tokens are
//! base64 of a small versioned JSON document. Anything that fails to decode,
//! including a cursor from an unknown version, means "start from the beginning".

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::model::Reservation;
use crate::schedule::ClockTime;

const CURSOR_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub slot_start: ClockTime,
    pub booking_id: Ulid,
}

#[derive(Serialize, Deserialize)]
struct CursorDoc {
    v: u8,
    #[serde(rename = "slotStart")]
    slot_start: String,
    #[serde(rename = "bookingId")]
    booking_id: String,
}

impl Cursor {
    pub fn after(reservation: &Reservation) -> Self {
        Self {
            slot_start: reservation.slot.start,
            booking_id: reservation.booking_id,
        }
    }

    pub fn encode(&self) -> String {
        let doc = CursorDoc {
            v: CURSOR_VERSION,
            slot_start: self.slot_start.to_string(),
            booking_id: self.booking_id.to_string(),
        };
        // Serializing a struct of plain strings cannot fail.
        let json = serde_json::to_vec(&doc).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Lenient decode: `None` for absent, corrupt or foreign tokens.
    pub fn decode(token: Option<&str>) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token?.trim()).ok()?;
        let doc: CursorDoc = serde_json::from_slice(&bytes).ok()?;
        if doc.v != CURSOR_VERSION {
            return None;
        }
        Some(Self {
            slot_start: ClockTime::parse(&doc.slot_start)?,
            booking_id: Ulid::from_string(&doc.booking_id).ok()?,
        })
    }

    /// True if `reservation` sorts strictly after this cursor.
    pub fn precedes(&self, reservation: &Reservation) -> bool {
        (reservation.slot.start, reservation.booking_id) > (self.slot_start, self.booking_id)
    }
}

/// Coerce a caller-requested page size: absent or non-positive → default,
/// anything larger than the cap → the cap.
pub fn page_size(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => (n as u64).min(MAX_PAGE_SIZE as u64) as usize,
        _ => DEFAULT_PAGE_SIZE,
    }
}
