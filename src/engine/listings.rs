use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Listing capacity as a seat count. Zero, negative, or out-of-range values
/// mean the mirrored listing is unusable for booking.
pub(super) fn slot_capacity(listing: &Listing) -> Result<u32, EngineError> {
    u32::try_from(listing.slot_capacity)
        .ok()
        .filter(|c| *c > 0)
        .ok_or(EngineError::invalid("slot_capacity", "listing slot capacity must be a positive integer"))
}

pub(super) fn validate_id(field: &'static str, id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::invalid(field, "is required"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::invalid(field, "is too long"));
    }
    Ok(())
}

/// Only the listing service writes the mirror.
fn authorize_listing_write(writer: ListingWriter<'_>, id: &str) -> Result<(), EngineError> {
    match writer {
        ListingWriter::Service => Ok(()),
        ListingWriter::User("") => Err(EngineError::Unauthorized),
        ListingWriter::User(user) => {
            tracing::warn!(user, listing = id, "listing write refused");
            Err(EngineError::Forbidden(id.to_string()))
        }
    }
}

impl Engine {
    /// Mirror a listing pushed by the listing service. Schedule and capacity
    /// are stored verbatim; booking re-validates them on every use.
    pub async fn upsert_listing(
        &self,
        writer: ListingWriter<'_>,
        listing: Listing,
    ) -> Result<(), EngineError> {
        authorize_listing_write(writer, &listing.id)?;
        validate_id("id", &listing.id)?;
        validate_id("owner_id", &listing.owner_id)?;
        if !self.listings.contains_key(&listing.id) && self.listings.len() >= MAX_LISTINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many listings"));
        }
        tracing::debug!(listing = %listing.id, "listing mirrored");
        self.commit_listing_event(Event::ListingUpserted { listing }).await
    }

    /// Drop a listing from the mirror. Its reservations are kept.
    pub async fn remove_listing(&self, writer: ListingWriter<'_>, id: &str) -> Result<(), EngineError> {
        authorize_listing_write(writer, id)?;
        if !self.listings.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.commit_listing_event(Event::ListingRemoved { id: id.to_string() })
            .await
    }

    pub fn get_listing(&self, id: &str) -> Option<Listing> {
        self.listings.get(id).map(|e| e.value().clone())
    }

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }
}
