use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::*;

use super::StoreError;

/// Owner of every car's reservation list.
///
/// Reads hand back owned snapshots; the booking service never caches them.
/// Implementations must make `append_reservation` durable before returning
/// `Ok`.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, StoreError>;

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError>;

    /// Fails with `DuplicateCar` if the id is taken.
    async fn insert_car(&self, info: CarInfo) -> Result<(), StoreError>;

    /// Fails with `UnknownCar` if the id is not registered.
    async fn remove_car(&self, id: CarId) -> Result<(), StoreError>;

    /// Fails with `UnknownCar` if the car is not registered.
    async fn append_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;

    /// `Ok(false)` if the car has no reservation with that id.
    async fn remove_reservation(
        &self,
        car_id: CarId,
        reservation_id: ReservationId,
    ) -> Result<bool, StoreError>;

    fn car_count(&self) -> usize;
}

/// Apply a reservation event to a car. Catalog events are handled by the
/// owning map, not here.
pub(crate) fn apply_to_car(car: &mut Car, event: &Event) {
    match event {
        Event::ReservationCommitted {
            id,
            car_id,
            interval,
        } => car.push_reservation(Reservation {
            id: *id,
            car_id: *car_id,
            interval: *interval,
        }),
        Event::ReservationCancelled { id, .. } => {
            car.remove_reservation(*id);
        }
        Event::CarRegistered { .. } | Event::CarRemoved { .. } => {}
    }
}

/// Volatile store: the default for tests and the base for fakes.
pub struct InMemoryStore {
    cars: DashMap<CarId, Car>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            cars: DashMap::new(),
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, StoreError> {
        Ok(self.cars.get(&id).map(|e| e.value().clone()))
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        Ok(self.cars.iter().map(|e| e.value().clone()).collect())
    }

    async fn insert_car(&self, info: CarInfo) -> Result<(), StoreError> {
        match self.cars.entry(info.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateCar(info.id)),
            Entry::Vacant(slot) => {
                slot.insert(Car::new(info));
                Ok(())
            }
        }
    }

    async fn remove_car(&self, id: CarId) -> Result<(), StoreError> {
        self.cars
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownCar(id))
    }

    async fn append_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let mut car = self
            .cars
            .get_mut(&reservation.car_id)
            .ok_or(StoreError::UnknownCar(reservation.car_id))?;
        car.push_reservation(reservation);
        Ok(())
    }

    async fn remove_reservation(
        &self,
        car_id: CarId,
        reservation_id: ReservationId,
    ) -> Result<bool, StoreError> {
        let mut car = self
            .cars
            .get_mut(&car_id)
            .ok_or(StoreError::UnknownCar(car_id))?;
        Ok(car.remove_reservation(reservation_id).is_some())
    }

    fn car_count(&self) -> usize {
        self.cars.len()
    }
}
