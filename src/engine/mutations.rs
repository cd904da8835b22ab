use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::request::{BookingRequest, RawBookingRequest};

use super::conflict::{check_capacity, check_no_conflict, has_live_reservations, today};
use super::{BookingError, BookingPhase, BookingService};

impl BookingService {
    /// Validate raw input, then check and book. Invalid input never reaches
    /// the store.
    pub async fn check_availability_and_book_raw(
        &self,
        raw: &RawBookingRequest,
    ) -> Result<Reservation, BookingError> {
        let request = match BookingRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                let result = Err(BookingError::from(e));
                observability::record_booking(&result, std::time::Duration::ZERO);
                return result;
            }
        };
        self.check_availability_and_book(request).await
    }

    /// Book `request.interval` on the car if no reservation touches or
    /// overlaps it.
    pub async fn check_availability_and_book(
        &self,
        request: BookingRequest,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let BookingRequest { car_id, interval } = request;
        debug!(
            car = %car_id,
            from = %interval.from_date(),
            to = %interval.to_date(),
            phase = BookingPhase::Requested.as_str(),
            "booking request"
        );

        let result = self.book_locked(car_id, interval).await;

        let phase = BookingPhase::settle(&result);
        observability::record_booking(&result, started.elapsed());
        match &result {
            Ok(reservation) => info!(
                car = %car_id,
                reservation = %reservation.id,
                "booked {} to {}",
                interval.from_date(),
                interval.to_date()
            ),
            Err(e @ BookingError::StorageFailure(_)) => {
                warn!(car = %car_id, phase = phase.as_str(), "booking failed: {e}")
            }
            Err(e) => debug!(car = %car_id, phase = phase.as_str(), "booking rejected: {e}"),
        }
        result
    }

    async fn book_locked(&self, car_id: CarId, interval: Interval) -> Result<Reservation, BookingError> {
        let guard = self.lock_car(car_id).await;
        debug!(car = %car_id, phase = BookingPhase::Checking.as_str(), "checking availability");

        let car = self.load_car(car_id).await?;
        check_capacity(&car)?;
        check_no_conflict(&car, &interval)?;

        let reservation = Reservation {
            id: Ulid::new(),
            car_id,
            interval,
        };
        let _guard = self.persist_reservation(guard, &reservation).await?;
        self.notify.send(&Event::ReservationCommitted {
            id: reservation.id,
            car_id,
            interval,
        });
        Ok(reservation)
    }

    /// Remove one reservation, freeing its dates.
    pub async fn cancel_reservation(
        &self,
        car_id: CarId,
        reservation_id: ReservationId,
    ) -> Result<Reservation, BookingError> {
        let _guard = self.lock_car(car_id).await;
        let car = self.load_car(car_id).await?;
        let reservation = car
            .reservations
            .iter()
            .find(|r| r.id == reservation_id)
            .cloned()
            .ok_or(BookingError::NotFound(reservation_id))?;

        let removed = self
            .bounded(
                "persist",
                self.store.remove_reservation(car_id, reservation_id),
            )
            .await?;
        if !removed {
            return Err(BookingError::NotFound(reservation_id));
        }
        self.notify.send(&Event::ReservationCancelled {
            id: reservation_id,
            car_id,
        });
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!(car = %car_id, reservation = %reservation_id, "reservation cancelled");
        Ok(reservation)
    }

    pub async fn register_car(&self, info: CarInfo) -> Result<Car, BookingError> {
        let _catalog = self.catalog.lock().await;
        if self.store.car_count() >= self.max_cars {
            return Err(BookingError::LimitExceeded("too many cars"));
        }
        let car_id = info.id;
        let _guard = self.lock_car(car_id).await;
        self.bounded("persist", self.store.insert_car(info.clone()))
            .await?;
        self.notify.send(&Event::CarRegistered { info: info.clone() });
        metrics::gauge!(observability::CARS_REGISTERED).set(self.store.car_count() as f64);
        info!(car = %car_id, "registered {} ({}, {})", info.name, info.category, info.location);
        Ok(Car::new(info))
    }

    /// Retire a car. Refused while any reservation ends today or later.
    pub async fn remove_car(&self, car_id: CarId) -> Result<(), BookingError> {
        let _catalog = self.catalog.lock().await;
        let guard = self.lock_car(car_id).await;
        let car = self.load_car(car_id).await?;
        if has_live_reservations(&car, today()) {
            return Err(BookingError::HasReservations(car_id));
        }
        self.bounded("persist", self.store.remove_car(car_id)).await?;
        let event = Event::CarRemoved { id: car_id };
        self.notify.send(&event);
        self.notify.remove(&car_id);
        drop(guard);
        self.forget_lock(&car_id);
        metrics::gauge!(observability::CARS_REGISTERED).set(self.store.car_count() as f64);
        info!(car = %car_id, "car removed");
        Ok(())
    }
}
