use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_stays;
use super::conflict::{find_conflicts, has_conflict, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Advisory preview of what blocks `candidate` on a suite. Commits nothing.
    pub async fn find_conflicts(
        &self,
        suite_id: Ulid,
        candidate: Stay,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let guard = self.lock_suite_read(suite_id).await?;
        Ok(find_conflicts(&guard, &candidate, exclude).cloned().collect())
    }

    /// Existence-only form of [`Engine::find_conflicts`].
    pub async fn is_available(
        &self,
        suite_id: Ulid,
        candidate: Stay,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let guard = self.lock_suite_read(suite_id).await?;
        Ok(!has_conflict(&guard, &candidate, exclude))
    }

    /// Checked-in bookings whose stay contains `as_of`: the suites occupied that day.
    pub async fn list_active_bookings(&self, as_of: NaiveDate) -> Vec<Booking> {
        let day = Stay::day(as_of);
        let mut rows = Vec::new();
        for rs in self.suite_handles() {
            let guard = rs.read().await;
            rows.extend(
                guard
                    .overlapping(&day)
                    .filter(|b| b.status == BookingStatus::CheckedIn)
                    .map(|b| (guard.suite.label.clone(), b.clone())),
            );
        }
        metrics::gauge!(crate::observability::OCCUPIED_SUITES).set(rows.len() as f64);
        sort_by_start_then_label(rows)
    }

    /// Every booking, ordered by start date then suite label.
    pub async fn list_bookings(&self) -> Vec<Booking> {
        let mut rows = Vec::new();
        for rs in self.suite_handles() {
            let guard = rs.read().await;
            rows.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| (guard.suite.label.clone(), b.clone())),
            );
        }
        sort_by_start_then_label(rows)
    }

    /// Bookings of any status touching `window`, for calendar views.
    pub async fn bookings_in_window(&self, window: Stay) -> Result<Vec<Booking>, EngineError> {
        validate_window(&window)?;
        let mut rows = Vec::new();
        for rs in self.suite_handles() {
            let guard = rs.read().await;
            rows.extend(
                guard
                    .overlapping(&window)
                    .map(|b| (guard.suite.label.clone(), b.clone())),
            );
        }
        Ok(sort_by_start_then_label(rows))
    }

    pub async fn bookings_for_suite(&self, suite_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let guard = self.lock_suite_read(suite_id).await?;
        Ok(guard.bookings.clone())
    }

    pub async fn free_stays(&self, suite_id: Ulid, window: Stay) -> Result<Vec<Stay>, EngineError> {
        validate_window(&window)?;
        let guard = self.lock_suite_read(suite_id).await?;
        Ok(free_stays(&guard, &window))
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let suite_id = self.booking_to_suite.get(&id).map(|e| *e.value())?;
        let rs = self.suite_state(&suite_id).ok()?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    pub async fn get_suite(&self, id: Ulid) -> Option<Suite> {
        let rs = self.suite_state(&id).ok()?;
        let guard = rs.read().await;
        Some(guard.suite.clone())
    }

    /// All suites ordered by label.
    pub async fn list_suites(&self) -> Vec<Suite> {
        let mut suites = Vec::with_capacity(self.suites.len());
        for rs in self.suite_handles() {
            suites.push(rs.read().await.suite.clone());
        }
        suites.sort_by(|a, b| a.label.cmp(&b.label));
        suites
    }

    pub fn get_pet(&self, id: Ulid) -> Option<Pet> {
        self.pets.get(&id).map(|e| e.value().clone())
    }

    /// Snapshot the suite handles so no DashMap shard guard is held across an await.
    fn suite_handles(&self) -> Vec<super::SharedSuiteState> {
        self.suites.iter().map(|e| e.value().clone()).collect()
    }
}

fn sort_by_start_then_label(mut rows: Vec<(String, Booking)>) -> Vec<Booking> {
    rows.sort_by(|(la, a), (lb, b)| a.start_date.cmp(&b.start_date).then_with(|| la.cmp(lb)));
    rows.into_iter().map(|(_, b)| b).collect()
}
