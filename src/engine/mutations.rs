use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_input};
use super::transition::{is_status_change_allowed, transition_effect, TransitionEffect};
use super::{apply_to_suite, Engine, EngineError, Reference, WalCommand};

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_suite(&self, label: &str, notes: &str) -> Result<Suite, EngineError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(EngineError::LimitExceeded("suite label empty"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("suite label too long"));
        }
        if notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let _catalog = self.catalog.lock().await;
        if self.suites.len() >= MAX_SUITES {
            return Err(EngineError::LimitExceeded("too many suites"));
        }
        if self.labels.contains_key(label) {
            return Err(EngineError::DuplicateLabel(label.to_string()));
        }

        let now = self.clock.stamp();
        let suite = Suite {
            id: Ulid::new(),
            label: label.to_string(),
            notes: notes.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.wal_append(&Event::SuiteCreated { suite: suite.clone() }).await?;
        self.labels.insert(suite.label.clone(), suite.id);
        self.suites
            .insert(suite.id, Arc::new(RwLock::new(SuiteState::new(suite.clone()))));
        info!(suite_id = %suite.id, label = %suite.label, "suite created");
        Ok(suite)
    }

    /// Notes are the only suite field that may change once bookings reference it.
    pub async fn update_suite_notes(&self, id: Ulid, notes: &str) -> Result<Suite, EngineError> {
        if notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let mut guard = self.lock_suite_write(id).await?;
        let event = Event::SuiteNotesUpdated {
            id,
            notes: notes.to_string(),
            at: self.clock.stamp(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.suite.clone())
    }

    /// Refused while any booking, checked-out history included, references the suite.
    pub async fn delete_suite(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut guard = self.lock_suite_write(id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::SuiteInUse(id));
        }
        self.wal_append(&Event::SuiteDeleted { id }).await?;
        guard.deleted = true;
        self.labels.remove(&guard.suite.label);
        self.suites.remove(&id);
        info!(suite_id = %id, "suite deleted");
        Ok(())
    }

    pub async fn register_pet(&self, name: &str) -> Result<Pet, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::LimitExceeded("pet name empty"));
        }
        if name.len() > MAX_PET_NAME_LEN {
            return Err(EngineError::LimitExceeded("pet name too long"));
        }
        let _catalog = self.catalog.lock().await;
        if self.pets.len() >= MAX_PETS {
            return Err(EngineError::LimitExceeded("too many pets"));
        }
        let pet = Pet {
            id: Ulid::new(),
            name: name.to_string(),
            created_at: self.clock.stamp(),
        };
        self.wal_append(&Event::PetRegistered { pet: pet.clone() }).await?;
        self.pets.insert(pet.id, pet.clone());
        Ok(pet)
    }

    // ── Admission ────────────────────────────────────────────

    /// Create a booking (`existing == None`) or replace booking `existing` with `input`.
    ///
    /// Validation runs in order and the first failure wins: date range and field
    /// limits, reference resolution, status policy, then a conflict query under the
    /// suite's shared lock. The commit takes the exclusive lock, repeats the
    /// conflict query against what is there now, and only then writes. A rejection
    /// leaves the store untouched.
    pub async fn propose_booking(
        &self,
        input: BookingInput,
        existing: Option<Ulid>,
    ) -> Result<Booking, EngineError> {
        self.propose(input, existing, None).await
    }

    /// `patch`, when set, is re-applied to the stored booking under the write
    /// lock, so concurrent patches to different fields both land.
    async fn propose(
        &self,
        input: BookingInput,
        existing: Option<Ulid>,
        patch: Option<BookingPatch>,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let suite_id = input.suite_id;
        let result = self.admit(input, existing, patch).await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => outcome)
            .increment(1);
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(%suite_id, ?existing, reason = e.kind(), "booking rejected: {e}");
        }
        result
    }

    async fn admit(
        &self,
        input: BookingInput,
        existing: Option<Ulid>,
        patch: Option<BookingPatch>,
    ) -> Result<Booking, EngineError> {
        // 1. fields
        let stay = validate_input(&input)?;

        // 2. references
        self.suite_state(&input.suite_id)?;
        if !self.pets.contains_key(&input.pet_id) {
            return Err(EngineError::UnknownReference(Reference::Pet(input.pet_id)));
        }
        let prior = match existing {
            Some(id) => Some(
                self.get_booking(id)
                    .await
                    .ok_or(EngineError::UnknownReference(Reference::Booking(id)))?,
            ),
            None => None,
        };

        // 3. status policy
        if let Some(prior) = &prior {
            self.check_status_change(prior.status, input.status)?;
        }

        // 4. optimistic conflict pre-check; may be stale by commit time
        if input.status.is_active() {
            let guard = self.lock_suite_read(input.suite_id).await?;
            check_no_conflict(&guard, &stay, existing)?;
        }

        self.commit(input, stay, prior, patch).await
    }

    fn check_status_change(&self, from: BookingStatus, to: BookingStatus) -> Result<(), EngineError> {
        if !is_status_change_allowed(self.options.status_policy, from, to) {
            return Err(EngineError::StatusChangeRejected { from, to });
        }
        Ok(())
    }

    /// Authoritative phase: everything re-checked under the exclusive suite lock(s).
    async fn commit(
        &self,
        input: BookingInput,
        stay: Stay,
        prior: Option<Booking>,
        patch: Option<BookingPatch>,
    ) -> Result<Booking, EngineError> {
        let target_id = input.suite_id;
        let moved_from = prior
            .as_ref()
            .map(|p| p.suite_id)
            .filter(|prev| *prev != target_id);

        // Locks in id order so two moves in opposite directions can't deadlock.
        let mut lock_ids = vec![target_id];
        lock_ids.extend(moved_from);
        lock_ids.sort();
        let mut guards: Vec<OwnedRwLockWriteGuard<SuiteState>> = Vec::with_capacity(lock_ids.len());
        for id in &lock_ids {
            guards.push(self.lock_suite_write(*id).await?);
        }

        // The stored record may have changed since phase one.
        let current = match &prior {
            Some(p) => {
                let holder = guards
                    .iter()
                    .find(|g| g.id() == p.suite_id)
                    .and_then(|g| g.booking(p.id).cloned());
                match holder {
                    Some(current) => Some(current),
                    None if self.booking_to_suite.contains_key(&p.id) => {
                        // Moved to a suite we didn't lock; the caller retries from scratch.
                        return Err(EngineError::Busy { suite_id: p.suite_id });
                    }
                    None => return Err(EngineError::UnknownReference(Reference::Booking(p.id))),
                }
            }
            None => None,
        };

        // Merge onto what is stored now, not the snapshot phase one saw.
        let (input, stay) = match (patch, &current) {
            (Some(patch), Some(c)) => {
                let merged = patch.apply_to(c);
                if merged.suite_id != target_id {
                    return Err(EngineError::Busy { suite_id: target_id });
                }
                let stay = validate_input(&merged)?;
                (merged, stay)
            }
            _ => (input, stay),
        };

        let effect = match &current {
            Some(c) => {
                self.check_status_change(c.status, input.status)?;
                transition_effect(c.status, input.status)
            }
            None if input.status.is_active() => TransitionEffect::StaysActive,
            None => TransitionEffect::StaysInactive,
        };

        let id = current.as_ref().map(|c| c.id);
        let target = guards
            .iter()
            .find(|g| g.id() == target_id)
            .ok_or(EngineError::UnknownReference(Reference::Suite(target_id)))?;
        if effect.needs_conflict_check() {
            check_no_conflict(target, &stay, id)?;
        }
        if current.is_none() && target.bookings.len() >= MAX_BOOKINGS_PER_SUITE {
            return Err(EngineError::LimitExceeded("too many bookings on suite"));
        }

        let now = self.clock.stamp();
        let booking = Booking {
            id: id.unwrap_or_else(Ulid::new),
            suite_id: target_id,
            pet_id: input.pet_id,
            start_date: stay.start,
            end_date: stay.end,
            status: input.status,
            bathed: input.bathed,
            notes: input.notes,
            created_at: current.as_ref().map_or(now, |c| c.created_at),
            updated_at: now,
        };
        let event = match &current {
            None => Event::BookingCreated {
                booking: booking.clone(),
            },
            Some(c) => Event::BookingUpdated {
                booking: booking.clone(),
                previous_suite_id: c.suite_id,
            },
        };

        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            apply_to_suite(guard, &event, &self.booking_to_suite);
        }

        match effect {
            TransitionEffect::Leaves => {
                info!(booking_id = %booking.id, suite_id = %target_id, "booking checked out, suite released")
            }
            TransitionEffect::Joins => {
                info!(booking_id = %booking.id, suite_id = %target_id, "booking reopened, suite held")
            }
            _ => debug!(booking_id = %booking.id, suite_id = %target_id, status = %booking.status, "booking admitted"),
        }
        Ok(booking)
    }

    /// Merge a partial update onto the stored booking and run it through admission.
    pub async fn amend_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let current = self
            .get_booking(id)
            .await
            .ok_or(EngineError::UnknownReference(Reference::Booking(id)))?;
        let input = patch.clone().apply_to(&current);
        self.propose(input, Some(id), Some(patch)).await
    }

    pub async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        self.amend_booking(
            id,
            BookingPatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let suite_id = self
            .booking_to_suite
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::UnknownReference(Reference::Booking(id)))?;
        let mut guard = self.lock_suite_write(suite_id).await?;
        if guard.booking(id).is_none() {
            return Err(EngineError::UnknownReference(Reference::Booking(id)));
        }
        self.persist_and_apply(&mut guard, &Event::BookingDeleted { id, suite_id })
            .await?;
        debug!(booking_id = %id, %suite_id, "booking deleted");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Holds the catalog lock and every suite's read lock until the swap is done,
    /// so no append can slip in between snapshot and rewrite.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        let mut suite_ids: Vec<Ulid> = self.suites.iter().map(|e| *e.key()).collect();
        suite_ids.sort();
        let mut guards = Vec::with_capacity(suite_ids.len());
        for id in &suite_ids {
            if let Ok(rs) = self.suite_state(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        let mut pets: Vec<Pet> = self.pets.iter().map(|e| e.value().clone()).collect();
        pets.sort_by_key(|p| p.id);
        events.extend(pets.into_iter().map(|pet| Event::PetRegistered { pet }));
        for guard in &guards {
            events.push(Event::SuiteCreated {
                suite: guard.suite.clone(),
            });
        }
        for guard in &guards {
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreFailure(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
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
