use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type CarId = Ulid;
pub type ReservationId = Ulid;

/// Rental span over whole calendar days, `from_date < to_date`.
///
/// Both endpoints count as occupied: two intervals that share only a
/// boundary day still overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "IntervalRepr")]
pub struct Interval {
    from_date: NaiveDate,
    to_date: NaiveDate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntervalRepr {
    from_date: NaiveDate,
    to_date: NaiveDate,
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = IntervalError;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        Interval::new(repr.from_date, repr.to_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    NotIncreasing { from: NaiveDate, to: NaiveDate },
}

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalError::NotIncreasing { from, to } => {
                write!(f, "fromDate {from} must be before toDate {to}")
            }
        }
    }
}

impl std::error::Error for IntervalError {}

impl Interval {
    pub fn new(from_date: NaiveDate, to_date: NaiveDate) -> Result<Self, IntervalError> {
        if from_date >= to_date {
            return Err(IntervalError::NotIncreasing {
                from: from_date,
                to: to_date,
            });
        }
        Ok(Self { from_date, to_date })
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from_date
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to_date
    }

    /// Billable rental days (`to - from`), always at least 1.
    pub fn rental_days(&self) -> i64 {
        (self.to_date - self.from_date).num_days()
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.from_date <= other.to_date && other.from_date <= self.to_date
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.from_date <= date && date <= self.to_date
    }
}

/// Inclusive run of calendar days `[first, last]`; a single day is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateSpan {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateSpan {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Self {
        debug_assert!(first <= last, "DateSpan first must not be after last");
        Self { first, last }
    }

    pub fn day_count(&self) -> i64 {
        (self.last - self.first).num_days() + 1
    }
}

/// A committed interval on one car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub car_id: CarId,
    #[serde(flatten)]
    pub interval: Interval,
}

/// Catalog attributes of a car. Prices are whole currency units per day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarInfo {
    pub id: CarId,
    pub name: String,
    pub category: String,
    pub location: String,
    pub year: i32,
    pub daily_price: u32,
    pub old_daily_price: Option<u32>,
}

impl CarInfo {
    /// Cheapest advertised daily price (current or previous).
    pub fn best_daily_price(&self) -> u32 {
        match self.old_daily_price {
            Some(old) => old.min(self.daily_price),
            None => self.daily_price,
        }
    }
}

/// A car and its reservations in append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    #[serde(flatten)]
    pub info: CarInfo,
    #[serde(rename = "rentalHistory")]
    pub reservations: Vec<Reservation>,
}

impl Car {
    pub fn new(info: CarInfo) -> Self {
        Self {
            info,
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> CarId {
        self.info.id
    }

    pub fn push_reservation(&mut self, reservation: Reservation) {
        self.reservations.push(reservation);
    }

    /// Remove by id, keeping the order of the rest.
    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn intervals(&self) -> impl Iterator<Item = &Interval> {
        self.reservations.iter().map(|r| &r.interval)
    }
}

/// WAL record format. Flat, no nesting beyond value types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CarRegistered {
        info: CarInfo,
    },
    CarRemoved {
        id: CarId,
    },
    ReservationCommitted {
        id: ReservationId,
        car_id: CarId,
        interval: Interval,
    },
    ReservationCancelled {
        id: ReservationId,
        car_id: CarId,
    },
}

impl Event {
    pub fn car_id(&self) -> CarId {
        match self {
            Event::CarRegistered { info } => info.id,
            Event::CarRemoved { id } => *id,
            Event::ReservationCommitted { car_id, .. }
            | Event::ReservationCancelled { car_id, .. } => *car_id,
        }
    }
}

/// Typed availability search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub location: Option<String>,
    pub category: Option<String>,
    pub window: Option<Interval>,
    pub max_daily_price: Option<u32>,
}
