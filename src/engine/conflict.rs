use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{conflicts, is_available};
use super::BookingError;

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn check_capacity(car: &Car) -> Result<(), BookingError> {
    if car.reservations.len() >= MAX_RESERVATIONS_PER_CAR {
        return Err(BookingError::LimitExceeded("too many reservations on car"));
    }
    Ok(())
}

/// `Unavailable` carries every reservation the candidate collides with.
pub(crate) fn check_no_conflict(car: &Car, candidate: &Interval) -> Result<(), BookingError> {
    if is_available(car.intervals(), candidate) {
        return Ok(());
    }
    Err(BookingError::Unavailable {
        car_id: car.id(),
        requested: *candidate,
        conflicts: conflicts(&car.reservations, candidate),
    })
}

/// Reservations that end on or after `today` still bind the car.
pub(crate) fn has_live_reservations(car: &Car, today: NaiveDate) -> bool {
    car.intervals().any(|i| i.to_date() >= today)
}
