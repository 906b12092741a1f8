use std::sync::Arc;

use crate::model::*;
use crate::schedule::Slot;

use super::{DayLedger, EngineError};

/// Any positive seat count is well-formed. A party bigger than the slot is
/// turned away later, by the capacity check.
pub(crate) fn validate_guest_count(guest_count: Option<i64>) -> Result<u32, EngineError> {
    guest_count
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or(EngineError::invalid("guest_count", "must be a positive integer"))
}

/// Recount the slot from the ledger and refuse if the new party would push
/// it past capacity.
pub(crate) fn check_capacity(
    ledger: &DayLedger,
    slot: Slot,
    requested: u32,
    capacity: u32,
) -> Result<(), EngineError> {
    let booked = ledger.booked_in(slot);
    if booked.saturating_add(requested) > capacity {
        return Err(EngineError::CapacityExceeded {
            slot,
            booked,
            requested,
            capacity,
        });
    }
    Ok(())
}

/// A guest holds at most one reservation per listing, date and slot.
/// `same_day` is the guest's reservations on the ledger's date, any listing.
pub(crate) fn check_not_duplicate(
    same_day: &[Arc<Reservation>],
    ledger: &DayLedger,
    slot: Slot,
    user_id: &str,
) -> Result<(), EngineError> {
    let taken = same_day
        .iter()
        .any(|r| r.listing_id == ledger.key.listing_id && r.slot == slot);
    if taken {
        return Err(EngineError::DuplicateBooking {
            user_id: user_id.to_string(),
            day: ledger.key.clone(),
            slot,
        });
    }
    Ok(())
}
