use std::collections::HashMap;

use crate::model::*;
use crate::schedule::{derive_slots, Slot};

use super::listings::{slot_capacity, validate_id};
use super::{Engine, EngineError};

// ── Capacity aggregation ──────────────────────────────────────────

/// Sum guest counts per slot. Reservations are not filtered by status:
/// every stored reservation is confirmed.
pub fn tally_by_slot<'a>(reservations: impl IntoIterator<Item = &'a Reservation>) -> HashMap<Slot, u32> {
    let mut booked: HashMap<Slot, u32> = HashMap::new();
    for r in reservations {
        let seats = booked.entry(r.slot).or_default();
        *seats = seats.saturating_add(r.guest_count);
    }
    booked
}

/// Per-slot remaining capacity for a derived schedule.
///
/// `remaining` is clamped at zero: a slot that was oversold reports as merely
/// full, with the true load still visible in `booked`.
pub fn report_slots(schedule: &[Slot], capacity: u32, booked: &HashMap<Slot, u32>) -> Vec<SlotAvailability> {
    schedule
        .iter()
        .map(|&slot| {
            let booked = booked.get(&slot).copied().unwrap_or(0);
            let remaining = capacity.saturating_sub(booked);
            SlotAvailability {
                slot,
                booked,
                remaining,
                is_full: remaining == 0,
            }
        })
        .collect()
}

impl Engine {
    /// Guests already seated per slot for one listing/date, aggregated over the
    /// full ledger (never a single page).
    pub async fn booked_guests_by_slot(&self, listing_id: &str, date: &CalendarDate) -> HashMap<Slot, u32> {
        let key = DayKey::new(listing_id.to_string(), date.clone());
        match self.store.day(&key) {
            Some(ledger) => {
                let guard = ledger.read().await;
                tally_by_slot(guard.iter())
            }
            None => HashMap::new(),
        }
    }

    pub async fn get_availability(&self, listing_id: &str, date: &str) -> Result<Availability, EngineError> {
        validate_id("listing_id", listing_id)?;
        let date = CalendarDate::parse(date)
            .ok_or(EngineError::invalid("date", "must be YYYY-MM-DD"))?;

        let listing = self
            .get_listing(listing_id)
            .ok_or_else(|| EngineError::NotFound(listing_id.to_string()))?;
        let capacity = slot_capacity(&listing)?;
        let schedule = derive_slots(&listing.open_time, &listing.close_time).ok_or(EngineError::invalid(
            "schedule",
            "listing open_time and close_time must be valid HH:MM with open_time < close_time",
        ))?;

        let booked = self.booked_guests_by_slot(listing_id, &date).await;
        for (slot, seats) in &booked {
            if *seats > capacity {
                tracing::warn!(listing = listing_id, %date, %slot, seats, capacity, "slot is oversold");
            }
        }

        Ok(Availability {
            listing_id: listing.id,
            date,
            slot_capacity: capacity,
            slots: report_slots(&schedule, capacity, &booked),
        })
    }
}
