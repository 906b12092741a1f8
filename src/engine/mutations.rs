use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_ADMITTED_TOTAL, BOOKINGS_REJECTED_TOTAL};
use crate::schedule::{derive_slots, Slot};

use super::conflict::{check_capacity, check_not_duplicate, validate_guest_count};
use super::listings::{slot_capacity, validate_id};
use super::{Engine, EngineError};

impl Engine {
    /// Admit a booking or say exactly why not.
    ///
    /// Validation runs in a fixed order so the reported error is deterministic:
    /// listing id, date, slot shape, listing existence, listing capacity, slot
    /// membership in the current schedule, guest count. The capacity recount,
    /// duplicate check, durable append and in-memory apply then all happen
    /// under the write lock of the `(listing, date)` ledger, so concurrent
    /// admissions into the same day are serialized and can neither oversell a
    /// slot nor double-book a guest.
    pub async fn create_reservation(
        &self,
        request: BookingRequest,
        guest: Guest,
    ) -> Result<Reservation, EngineError> {
        let result = self.admit(request, guest).await;
        match &result {
            Ok(r) => {
                metrics::counter!(BOOKINGS_ADMITTED_TOTAL).increment(1);
                tracing::info!(
                    booking = %r.booking_id,
                    listing = %r.listing_id,
                    date = %r.date,
                    slot = %r.slot,
                    guests = r.guest_count,
                    "booking admitted"
                );
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.kind().label()).increment(1);
                tracing::debug!("booking rejected: {e}");
            }
        }
        result
    }

    async fn admit(&self, request: BookingRequest, guest: Guest) -> Result<Reservation, EngineError> {
        if guest.user_id.is_empty() {
            return Err(EngineError::Unauthorized);
        }
        if guest.user_name.len() > MAX_USER_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }

        // 1–3: request shape
        validate_id("listing_id", &request.listing_id)?;
        let date = CalendarDate::parse(&request.date)
            .ok_or(EngineError::invalid("date", "must be YYYY-MM-DD"))?;
        let slot = Slot::parse(&request.slot_start, &request.slot_end).ok_or(EngineError::invalid(
            "slot",
            "slot_start and slot_end must be HH:MM exactly one hour apart",
        ))?;

        // 4–6: against the listing as currently mirrored
        let listing = self
            .get_listing(&request.listing_id)
            .ok_or_else(|| EngineError::NotFound(request.listing_id.clone()))?;
        let capacity = slot_capacity(&listing)?;
        let schedule = derive_slots(&listing.open_time, &listing.close_time).unwrap_or_default();
        if !schedule.contains(&slot) {
            return Err(EngineError::invalid("slot", "outside listing schedule"));
        }

        // 7
        let guest_count = validate_guest_count(request.guest_count)?;

        let user_name = if guest.user_name.is_empty() {
            guest.user_id.clone()
        } else {
            guest.user_name
        };

        // Gate before ledger: compaction takes the gate exclusively and then
        // reads ledgers.
        let _gate = self.commit_gate.read().await;
        let key = DayKey::new(listing.id.clone(), date.clone());
        let ledger = self.store.day_or_create(&key);

        let outcome: Result<Reservation, EngineError> = async {
            let mut ledger = ledger.write().await;

            if ledger.len() >= MAX_RESERVATIONS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many reservations for this listing and date"));
            }

            // 8
            check_capacity(&ledger, slot, guest_count, capacity)?;
            // 9
            let same_day = self.store.user_reservations_on(&guest.user_id, &date);
            check_not_duplicate(&same_day, &ledger, slot, &guest.user_id)?;

            // 10
            let reservation = Reservation {
                booking_id: Ulid::new(),
                listing_id: listing.id,
                date,
                slot,
                guest_count,
                user_id: guest.user_id,
                user_name,
                status: ReservationStatus::Confirmed,
                created_at: now_ms(),
            };
            self.commit_reservation(&mut ledger, reservation.clone()).await?;
            Ok(reservation)
        }
        .await;

        // A rejected first booking of the day must not leave an empty ledger.
        drop(ledger);
        if outcome.is_err() {
            self.store.discard_if_unused(&key);
        }
        outcome
    }
}
