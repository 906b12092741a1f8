mod availability;
mod conflict;
mod error;
mod listings;
mod mutations;
mod queries;
mod store;

pub use availability::{report_slots, tally_by_slot};
pub use error::{EngineError, ErrorKind};
pub use store::{DayLedger, ReservationStore, SharedDayLedger};

use std::io;
use std::path::PathBuf;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for one append, drain whatever else is already queued, then write
/// and fsync the batch once and answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    // A failed batch is cut back off the log before anyone hears about it.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.rewrite(&events);
            if let Err(e) = &result {
                tracing::error!("WAL compaction of {} failed: {e}", wal.path().display());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Booking engine for one tenant: the listing mirror, the reservation store
/// and the WAL that makes both durable.
pub struct Engine {
    pub(super) listings: DashMap<String, Listing>,
    pub(super) store: ReservationStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every commit and exclusively by compaction, so a
    /// compaction snapshot never misses an append that is still in flight.
    /// Always acquired before any ledger lock.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            listings: DashMap::new(),
            store: ReservationStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        // Replay runs before the engine is shared, so every ledger lock is
        // uncontended and try_write always succeeds.
        for event in events {
            match event {
                Event::ReservationCommitted { reservation } => {
                    let ledger = engine.store.day_or_create(&reservation.day_key());
                    let Ok(mut guard) = ledger.try_write() else {
                        return Err(io::Error::other("replay: ledger unexpectedly locked"));
                    };
                    engine.store.apply_committed(&mut guard, reservation);
                }
                other => engine.apply_listing_event(other),
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make a reservation durable, then publish it to the store. The caller
    /// holds the commit gate (shared) and then the reservation's ledger write
    /// lock, in that order.
    pub(super) async fn commit_reservation(
        &self,
        ledger: &mut DayLedger,
        reservation: Reservation,
    ) -> Result<(), EngineError> {
        let event = Event::ReservationCommitted {
            reservation: reservation.clone(),
        };
        self.wal_append(&event).await?;
        self.store.apply_committed(ledger, reservation);
        Ok(())
    }

    /// WAL-append then apply a listing mirror event.
    pub(super) async fn commit_listing_event(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply_listing_event(event);
        Ok(())
    }

    fn apply_listing_event(&self, event: Event) {
        match event {
            Event::ListingUpserted { listing } => {
                self.listings.insert(listing.id.clone(), listing);
            }
            Event::ListingRemoved { id } => {
                self.listings.remove(&id);
            }
            Event::ReservationCommitted { .. } => {}
        }
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .listings
            .iter()
            .map(|e| Event::ListingUpserted {
                listing: e.value().clone(),
            })
            .collect();
        for key in self.store.day_keys() {
            let Some(ledger) = self.store.day(&key) else { continue };
            let guard = ledger.read().await;
            events.extend(guard.iter().map(|r| Event::ReservationCommitted {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
