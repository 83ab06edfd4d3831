mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod transition;

pub use availability::{free_stays, merge_overlapping, subtract_stays};
pub use conflict::{find_conflicts, has_conflict};
pub use error::{EngineError, Reference};
pub use transition::{is_status_change_allowed, transition_effect, StatusPolicy, TransitionEffect};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use conflict::Clock;

pub type SharedSuiteState = Arc<RwLock<SuiteState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is queued, then does a
/// single fsync for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            // The whole batch fails together, so none of it may reach disk later.
            wal.rollback();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let _ = response.send(wal.append(&event));
        }
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Longest a proposal waits for a suite's booking set before giving up with `Busy`.
    pub lock_timeout: Duration,
    pub status_policy: StatusPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            status_policy: StatusPolicy::Permissive,
        }
    }
}

/// The booking store handle. One per data directory, shared behind an `Arc`.
pub struct Engine {
    pub(super) suites: DashMap<Ulid, SharedSuiteState>,
    /// Suite label → suite id, for uniqueness.
    pub(super) labels: DashMap<String, Ulid>,
    pub(super) pets: DashMap<Ulid, Pet>,
    /// Reverse lookup: booking id → suite id.
    pub(super) booking_to_suite: DashMap<Ulid, Ulid>,
    /// Serialises catalog writes (suites, pets) and compaction snapshots.
    /// Never taken on the admission path.
    pub(super) catalog: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Clock,
    pub(super) options: EngineOptions,
}

/// Apply an event to one suite's state. Caller holds the lock.
/// A move between suites is applied to both the old and the new suite.
fn apply_to_suite(ss: &mut SuiteState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SuiteNotesUpdated { notes, at, .. } => {
            ss.suite.notes = notes.clone();
            ss.suite.updated_at = *at;
        }
        Event::BookingCreated { booking } => {
            ss.insert_booking(booking.clone());
            booking_index.insert(booking.id, ss.id());
        }
        Event::BookingUpdated { booking, .. } => {
            ss.remove_booking(booking.id);
            if booking.suite_id == ss.id() {
                ss.insert_booking(booking.clone());
                booking_index.insert(booking.id, ss.id());
            }
        }
        Event::BookingDeleted { id, .. } => {
            ss.remove_booking(*id);
            booking_index.remove(id);
        }
        // Suite creation/deletion and pets live at the map level, not here
        Event::SuiteCreated { .. } | Event::SuiteDeleted { .. } | Event::PetRegistered { .. } => {}
    }
}

/// Suites whose booking sets an event touches.
fn affected_suites(event: &Event) -> Vec<Ulid> {
    match event {
        Event::SuiteNotesUpdated { id, .. } => vec![*id],
        Event::BookingCreated { booking } => vec![booking.suite_id],
        Event::BookingUpdated {
            booking,
            previous_suite_id,
        } => {
            if *previous_suite_id == booking.suite_id {
                vec![booking.suite_id]
            } else {
                vec![*previous_suite_id, booking.suite_id]
            }
        }
        Event::BookingDeleted { suite_id, .. } => vec![*suite_id],
        Event::SuiteCreated { .. } | Event::SuiteDeleted { .. } | Event::PetRegistered { .. } => {
            vec![]
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from inside a tokio runtime.
    pub fn new(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let clock = Clock::new();
        let booking_to_suite = DashMap::new();
        let mut suites: HashMap<Ulid, SuiteState> = HashMap::new();
        let mut pets: HashMap<Ulid, Pet> = HashMap::new();

        for event in &events {
            match event {
                Event::SuiteCreated { suite } => {
                    clock.observe(suite.updated_at);
                    suites.insert(suite.id, SuiteState::new(suite.clone()));
                }
                Event::SuiteDeleted { id } => {
                    suites.remove(id);
                }
                Event::PetRegistered { pet } => {
                    clock.observe(pet.created_at);
                    pets.insert(pet.id, pet.clone());
                }
                other => {
                    match other {
                        Event::BookingCreated { booking } | Event::BookingUpdated { booking, .. } => {
                            clock.observe(booking.updated_at)
                        }
                        Event::SuiteNotesUpdated { at, .. } => clock.observe(*at),
                        _ => {}
                    }
                    for suite_id in affected_suites(other) {
                        if let Some(ss) = suites.get_mut(&suite_id) {
                            apply_to_suite(ss, other, &booking_to_suite);
                        }
                    }
                }
            }
        }

        let booking_count = booking_to_suite.len();
        let engine = Self {
            suites: DashMap::new(),
            labels: DashMap::new(),
            pets: pets.into_iter().collect(),
            booking_to_suite,
            catalog: Mutex::new(()),
            wal_tx,
            clock,
            options,
        };
        for (id, ss) in suites {
            engine.labels.insert(ss.suite.label.clone(), id);
            engine.suites.insert(id, Arc::new(RwLock::new(ss)));
        }

        info!(
            events = events.len(),
            suites = engine.suites.len(),
            pets = engine.pets.len(),
            bookings = booking_count,
            "booking store opened"
        );
        Ok(engine)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
            .map_err(|e| {
                tracing::error!("WAL append failed: {e}");
                EngineError::StoreFailure(e.to_string())
            })
    }

    pub(super) fn suite_state(&self, id: &Ulid) -> Result<SharedSuiteState, EngineError> {
        self.suites
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::UnknownReference(Reference::Suite(*id)))
    }

    fn busy(&self, suite_id: Ulid) -> EngineError {
        warn!(%suite_id, timeout_ms = self.options.lock_timeout.as_millis() as u64, "suite lock wait timed out");
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::Busy { suite_id }
    }

    /// Exclusive access to one suite's booking set, bounded by `lock_timeout`.
    pub(super) async fn lock_suite_write(
        &self,
        suite_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SuiteState>, EngineError> {
        let rs = self.suite_state(&suite_id)?;
        let guard = tokio::time::timeout(self.options.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| self.busy(suite_id))?;
        if guard.deleted {
            return Err(EngineError::UnknownReference(Reference::Suite(suite_id)));
        }
        Ok(guard)
    }

    pub(super) async fn lock_suite_read(
        &self,
        suite_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<SuiteState>, EngineError> {
        let rs = self.suite_state(&suite_id)?;
        let guard = tokio::time::timeout(self.options.lock_timeout, rs.read_owned())
            .await
            .map_err(|_| self.busy(suite_id))?;
        if guard.deleted {
            return Err(EngineError::UnknownReference(Reference::Suite(suite_id)));
        }
        Ok(guard)
    }

    /// WAL-append then apply. Nothing touches memory if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SuiteState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_suite(ss, event, &self.booking_to_suite);
        Ok(())
    }
}
