use crate::cursor::{page_size, Cursor};
use crate::limits::MY_BOOKINGS_LIMIT;
use crate::model::*;

use super::listings::validate_id;
use super::{Engine, EngineError};

impl Engine {
    /// One page of a listing's reservations on a date, in index order.
    /// An unreadable cursor restarts from the first page.
    pub async fn list_reservations(
        &self,
        listing_id: &str,
        date: &CalendarDate,
        page_size_hint: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<ReservationPage, EngineError> {
        validate_id("listing_id", listing_id)?;
        let limit = page_size(page_size_hint);
        let after = Cursor::decode(cursor);

        let key = DayKey::new(listing_id.to_string(), date.clone());
        let (items, next) = match self.store.day(&key) {
            Some(ledger) => ledger.read().await.page_after(after, limit),
            None => (Vec::new(), None),
        };

        Ok(ReservationPage {
            listing_id: listing_id.to_string(),
            date: date.clone(),
            items,
            next_cursor: next.map(|c| c.encode()),
        })
    }

    /// Owner roster. Only the listing's owner may read it; a missing or
    /// malformed date means today (UTC).
    pub async fn list_roster(
        &self,
        caller: &str,
        listing_id: &str,
        date: Option<&str>,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<ReservationPage, EngineError> {
        if caller.is_empty() {
            return Err(EngineError::Unauthorized);
        }
        validate_id("listing_id", listing_id)?;
        let listing = self
            .get_listing(listing_id)
            .ok_or_else(|| EngineError::NotFound(listing_id.to_string()))?;
        if listing.owner_id != caller {
            return Err(EngineError::Forbidden(listing_id.to_string()));
        }

        let date = date
            .and_then(CalendarDate::parse)
            .unwrap_or_else(CalendarDate::today_utc);
        self.list_reservations(listing_id, &date, limit, cursor).await
    }

    /// The caller's own reservations across every listing and date, newest
    /// first, each joined with its listing's current hours.
    pub fn list_user_reservations(&self, caller: &str) -> Result<Vec<BookingWithListing>, EngineError> {
        if caller.is_empty() {
            return Err(EngineError::Unauthorized);
        }
        Ok(self
            .store
            .user_recent(caller, MY_BOOKINGS_LIMIT)
            .into_iter()
            .map(|reservation| BookingWithListing {
                listing: self.get_listing(&reservation.listing_id),
                reservation,
            })
            .collect())
    }
}
