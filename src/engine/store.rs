use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::cursor::Cursor;
use crate::model::*;
use crate::schedule::Slot;

pub type SharedDayLedger = Arc<RwLock<DayLedger>>;

/// Every reservation of one listing on one date, kept in index order
/// `(slot, booking_id)`. The ledger lock is the unit of admission atomicity.
#[derive(Debug)]
pub struct DayLedger {
    pub key: DayKey,
    reservations: Vec<Arc<Reservation>>,
}

impl DayLedger {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            reservations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().map(|r| r.as_ref())
    }

    /// Insert maintaining index order.
    pub fn insert(&mut self, reservation: Arc<Reservation>) {
        let key = reservation.index_key();
        let pos = self
            .reservations
            .binary_search_by_key(&key, |r| r.index_key())
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Seats taken in one slot, recounted from the stored reservations.
    pub fn booked_in(&self, slot: Slot) -> u32 {
        let lo = self.reservations.partition_point(|r| r.slot < slot);
        self.reservations[lo..]
            .iter()
            .take_while(|r| r.slot == slot)
            .fold(0u32, |acc, r| acc.saturating_add(r.guest_count))
    }

    /// One page of reservations strictly after `cursor`. The returned cursor is
    /// `Some` only when further reservations exist beyond this page.
    pub fn page_after(&self, cursor: Option<Cursor>, limit: usize) -> (Vec<Reservation>, Option<Cursor>) {
        let start = match cursor {
            Some(c) => self.reservations.partition_point(|r| !c.precedes(r)),
            None => 0,
        };
        let rest = &self.reservations[start..];
        let items: Vec<Reservation> = rest.iter().take(limit).map(|r| (**r).clone()).collect();
        let next = if rest.len() > limit {
            items.last().map(Cursor::after)
        } else {
            None
        };
        (items, next)
    }
}

/// Indexed reservation store: a ledger per (listing, date) plus a per-user
/// index used for duplicate detection and "my bookings".
pub struct ReservationStore {
    days: DashMap<DayKey, SharedDayLedger>,
    by_user: DashMap<String, Vec<Arc<Reservation>>>,
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    // ── Ledgers ──────────────────────────────────────────────

    pub fn day(&self, key: &DayKey) -> Option<SharedDayLedger> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub fn day_or_create(&self, key: &DayKey) -> SharedDayLedger {
        self.days
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(key.clone()))))
            .value()
            .clone()
    }

    /// Drop the ledger for `key` if it holds no reservations and nobody else
    /// has a handle to it. The caller must have released its own handle.
    /// Runs under the map's shard lock, so no new handle can be taken while
    /// the count is checked.
    pub fn discard_if_unused(&self, key: &DayKey) -> bool {
        self.days
            .remove_if(key, |_, ledger| {
                Arc::strong_count(ledger) == 1
                    && ledger.try_read().map(|l| l.is_empty()).unwrap_or(false)
            })
            .is_some()
    }

    pub fn day_keys(&self) -> Vec<DayKey> {
        self.days.iter().map(|e| e.key().clone()).collect()
    }

    // ── User index ───────────────────────────────────────────

    /// The user's reservations on `date`, across all listings.
    pub fn user_reservations_on(&self, user_id: &str, date: &CalendarDate) -> Vec<Arc<Reservation>> {
        self.by_user
            .get(user_id)
            .map(|list| list.iter().filter(|r| &r.date == date).cloned().collect())
            .unwrap_or_default()
    }

    /// Newest first by date, then by booking id (creation order).
    pub fn user_recent(&self, user_id: &str, limit: usize) -> Vec<Reservation> {
        self.by_user
            .get(user_id)
            .map(|list| list.iter().rev().take(limit).map(|r| (**r).clone()).collect())
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    /// Record a committed reservation in both indexes. The caller holds the
    /// write lock of the reservation's ledger.
    pub fn apply_committed(&self, ledger: &mut DayLedger, reservation: Reservation) {
        debug_assert_eq!(ledger.key, reservation.day_key());
        let reservation = Arc::new(reservation);
        let mut list = self.by_user.entry(reservation.user_id.clone()).or_default();
        let key = (&reservation.date, reservation.booking_id);
        let pos = list
            .binary_search_by(|r| (&r.date, r.booking_id).cmp(&key))
            .unwrap_or_else(|e| e);
        list.insert(pos, reservation.clone());
        drop(list);
        ledger.insert(reservation);
    }
}
