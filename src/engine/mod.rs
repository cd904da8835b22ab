mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod wal_store;
#[cfg(test)]
mod tests;

pub use availability::{conflicts, free_windows, is_available, is_date_taken, merge_day_spans, overlaps};
pub use error::{BookingError, StoreError};
pub use store::{InMemoryStore, ReservationStore};
pub use wal_store::WalStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::limits::MAX_CARS;
use crate::model::*;
use crate::notify::NotifyHub;

/// Where a check-and-book request is in its life.
///
/// `Requested → Checking → {Booked | Rejected | Failed}`. Validation and
/// not-found failures end in `Rejected`; only storage trouble is `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Requested,
    Checking,
    Booked,
    Rejected,
    Failed,
}

impl BookingPhase {
    pub fn settle(result: &Result<Reservation, BookingError>) -> Self {
        match result {
            Ok(_) => BookingPhase::Booked,
            Err(BookingError::StorageFailure(_)) => BookingPhase::Failed,
            Err(_) => BookingPhase::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingPhase::Requested => "requested",
            BookingPhase::Checking => "checking",
            BookingPhase::Booked => "booked",
            BookingPhase::Rejected => "rejected",
            BookingPhase::Failed => "failed",
        }
    }
}

/// Check-and-book orchestration over an injected `ReservationStore`.
///
/// Every operation that reads a car and then writes it runs under that car's
/// booking lock, so two requests for the same car never interleave between
/// the availability check and the append. Store calls are bounded by
/// `persist_timeout`.
pub struct BookingService {
    store: Arc<dyn ReservationStore>,
    notify: Arc<NotifyHub>,
    locks: DashMap<CarId, Arc<Mutex<()>>>,
    /// Serialises registration and removal so the car cap holds.
    catalog: Mutex<()>,
    max_cars: usize,
    persist_timeout: Duration,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        notify: Arc<NotifyHub>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notify,
            locks: DashMap::new(),
            catalog: Mutex::new(()),
            max_cars: MAX_CARS,
            persist_timeout,
        }
    }

    /// Lower the registration cap below `MAX_CARS`.
    pub fn with_max_cars(mut self, max_cars: usize) -> Self {
        self.max_cars = max_cars.min(MAX_CARS);
        self
    }

    pub fn subscribe(&self, car_id: CarId) -> broadcast::Receiver<Event> {
        self.notify.subscribe(car_id)
    }

    /// Serialise read-check-write sequences on one car.
    pub(super) async fn lock_car(&self, car_id: CarId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(car_id).or_default().value().clone();
        lock.lock_owned().await
    }

    /// Drop a car's lock entry unless someone else still holds or awaits it.
    /// Call after releasing your own guard.
    pub(super) fn forget_lock(&self, car_id: &CarId) {
        self.locks
            .remove_if(car_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Run a store call under the persistence timeout. Elapsed means
    /// `StorageFailure`, never a rejection.
    pub(super) async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.persist_timeout, call).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::StorageFailure(format!(
                "{what} timed out after {}ms",
                self.persist_timeout.as_millis()
            ))),
        }
    }

    /// Append `reservation` on a task of its own and wait up to
    /// `persist_timeout` for it.
    ///
    /// On timeout the task is left to settle while still holding the car's
    /// lock, and a reservation it did commit is removed again. Nobody can book
    /// or cancel on the car until then, so a retry sees the true state.
    pub(super) async fn persist_reservation(
        &self,
        guard: OwnedMutexGuard<()>,
        reservation: &Reservation,
    ) -> Result<OwnedMutexGuard<()>, BookingError> {
        let store = self.store.clone();
        let pending_reservation = reservation.clone();
        let mut pending: JoinHandle<Result<(), StoreError>> =
            tokio::spawn(async move { store.append_reservation(pending_reservation).await });

        match tokio::time::timeout(self.persist_timeout, &mut pending).await {
            Ok(Ok(result)) => result.map(|()| guard).map_err(BookingError::from),
            Ok(Err(e)) => Err(BookingError::StorageFailure(format!("persist task failed: {e}"))),
            Err(_) => {
                self.roll_back_when_settled(guard, pending, reservation.car_id, reservation.id);
                Err(BookingError::StorageFailure(format!(
                    "persist timed out after {}ms",
                    self.persist_timeout.as_millis()
                )))
            }
        }
    }

    fn roll_back_when_settled(
        &self,
        guard: OwnedMutexGuard<()>,
        pending: JoinHandle<Result<(), StoreError>>,
        car_id: CarId,
        reservation_id: ReservationId,
    ) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if !matches!(pending.await, Ok(Ok(()))) {
                return;
            }
            match store.remove_reservation(car_id, reservation_id).await {
                Ok(_) => warn!(
                    car = %car_id,
                    reservation = %reservation_id,
                    "rolled back reservation persisted after its caller timed out"
                ),
                Err(e) => warn!(
                    car = %car_id,
                    reservation = %reservation_id,
                    "rollback of timed-out reservation failed: {e}"
                ),
            }
        });
    }

    /// Fresh read of one car; `NotFound` if it is not registered.
    pub(super) async fn load_car(&self, car_id: CarId) -> Result<Car, BookingError> {
        self.bounded("load", self.store.fetch_car(car_id))
            .await?
            .ok_or(BookingError::NotFound(car_id))
    }
}
