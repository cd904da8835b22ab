use ulid::Ulid;

use crate::model::{CarId, Interval, Reservation};
use crate::request::ValidationError;

#[derive(Debug)]
pub enum BookingError {
    /// Input failed validation; never reached shared state.
    InvalidRequest(ValidationError),
    NotFound(Ulid),
    /// The requested dates touch or overlap existing reservations.
    Unavailable {
        car_id: CarId,
        requested: Interval,
        conflicts: Vec<Reservation>,
    },
    /// Persistence failed or timed out. Retry the whole operation.
    StorageFailure(String),
    AlreadyExists(Ulid),
    HasReservations(CarId),
    LimitExceeded(&'static str),
}

impl BookingError {
    /// True only for failures where repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::StorageFailure(_))
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidRequest(e) => write!(f, "invalid request: {e}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::Unavailable {
                car_id,
                requested,
                conflicts,
            } => write!(
                f,
                "car {car_id} is not available for {} to {}: {} conflicting reservation(s)",
                requested.from_date(),
                requested.to_date(),
                conflicts.len()
            ),
            BookingError::StorageFailure(e) => write!(f, "storage failure: {e}"),
            BookingError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            BookingError::HasReservations(id) => {
                write!(f, "cannot remove car {id}: it has current or upcoming reservations")
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        BookingError::InvalidRequest(e)
    }
}

/// Failures reported by a `ReservationStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownCar(CarId),
    DuplicateCar(CarId),
    Io(String),
    /// The background writer is gone.
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownCar(id) => write!(f, "unknown car: {id}"),
            StoreError::DuplicateCar(id) => write!(f, "duplicate car: {id}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Closed => write!(f, "store writer shut down"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownCar(id) => BookingError::NotFound(id),
            StoreError::DuplicateCar(id) => BookingError::AlreadyExists(id),
            StoreError::Io(_) | StoreError::Closed => BookingError::StorageFailure(e.to_string()),
        }
    }
}
