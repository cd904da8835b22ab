//! Loosely typed input in, typed requests out. Nothing here touches shared
//! state, so every error is reported before a car is read.

use chrono::{DateTime, Datelike, NaiveDate};
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Malformed(String),
    Missing(&'static str),
    BadId { field: &'static str, value: String },
    BadDate { field: &'static str, value: String },
    BadNumber { field: &'static str, value: String },
    DateOutOfRange { field: &'static str, date: NaiveDate },
    NotIncreasing(IntervalError),
    Reversed { first: NaiveDate, last: NaiveDate },
    TooLong(&'static str),
    Empty(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Malformed(e) => write!(f, "malformed body: {e}"),
            ValidationError::Missing(field) => write!(f, "missing field: {field}"),
            ValidationError::BadId { field, value } => write!(f, "{field}: bad id {value:?}"),
            ValidationError::BadDate { field, value } => {
                write!(f, "{field}: unparsable date {value:?}")
            }
            ValidationError::BadNumber { field, value } => {
                write!(f, "{field}: bad number {value:?}")
            }
            ValidationError::DateOutOfRange { field, date } => {
                write!(f, "{field}: {date} outside {MIN_VALID_YEAR}..={MAX_VALID_YEAR}")
            }
            ValidationError::NotIncreasing(e) => write!(f, "{e}"),
            ValidationError::Reversed { first, last } => {
                write!(f, "window start {first} is after its end {last}")
            }
            ValidationError::TooLong(what) => write!(f, "{what} too long"),
            ValidationError::Empty(field) => write!(f, "{field} must not be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Keep echoed input short.
fn clip(raw: &str) -> String {
    raw.chars().take(64).collect()
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::Missing(field)),
    }
}

pub fn parse_id(field: &'static str, raw: &str) -> Result<Ulid, ValidationError> {
    Ulid::from_string(raw.trim()).map_err(|_| ValidationError::BadId {
        field,
        value: clip(raw),
    })
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp; a timestamp contributes the
/// calendar date in its own offset.
pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .ok_or_else(|| ValidationError::BadDate {
            field,
            value: clip(raw),
        })?;
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(ValidationError::DateOutOfRange { field, date });
    }
    Ok(date)
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ValidationError> {
    raw.trim().parse().map_err(|_| ValidationError::BadNumber {
        field,
        value: clip(raw),
    })
}

/// Parse both ends and enforce `from < to` plus the rental length cap.
pub fn parse_interval(from: &str, to: &str) -> Result<Interval, ValidationError> {
    let from = parse_date("fromDate", from)?;
    let to = parse_date("toDate", to)?;
    let interval = Interval::new(from, to).map_err(ValidationError::NotIncreasing)?;
    if interval.rental_days() > MAX_RENTAL_DAYS {
        return Err(ValidationError::TooLong("rental"));
    }
    Ok(interval)
}

fn parse_text(field: &'static str, value: &Option<String>) -> Result<String, ValidationError> {
    let text = value.as_deref().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if text.len() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong(field));
    }
    Ok(text.to_string())
}

// ── Check-and-book ───────────────────────────────────────────────

/// Body of a check-and-book call, as received.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBookingRequest {
    #[serde(alias = "carId")]
    pub resource_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl RawBookingRequest {
    /// Decode a request body. Only the JSON shape is checked here.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub car_id: CarId,
    pub interval: Interval,
}

impl BookingRequest {
    pub fn parse(raw: &RawBookingRequest) -> Result<Self, ValidationError> {
        let car_id = parse_id("resourceId", required("resourceId", &raw.resource_id)?)?;
        let interval = parse_interval(
            required("fromDate", &raw.from_date)?,
            required("toDate", &raw.to_date)?,
        )?;
        Ok(Self { car_id, interval })
    }
}

// ── Car registration ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNewCar {
    pub id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub year: Option<i32>,
    #[serde(alias = "price")]
    pub daily_price: Option<u32>,
    #[serde(alias = "oldPrice")]
    pub old_daily_price: Option<u32>,
}

/// Validate a registration; a missing id gets a fresh ULID.
pub fn parse_new_car(raw: &RawNewCar) -> Result<CarInfo, ValidationError> {
    let id = match raw.id.as_deref() {
        Some(id) => parse_id("id", id)?,
        None => Ulid::new(),
    };
    let year = raw.year.ok_or(ValidationError::Missing("year"))?;
    if !(MIN_MODEL_YEAR..=MAX_MODEL_YEAR).contains(&year) {
        return Err(ValidationError::BadNumber {
            field: "year",
            value: year.to_string(),
        });
    }
    let daily_price = raw.daily_price.ok_or(ValidationError::Missing("dailyPrice"))?;
    for (field, price) in [("dailyPrice", Some(daily_price)), ("oldDailyPrice", raw.old_daily_price)] {
        if let Some(p) = price
            && p > MAX_DAILY_PRICE {
                return Err(ValidationError::BadNumber {
                    field,
                    value: p.to_string(),
                });
            }
    }
    Ok(CarInfo {
        id,
        name: parse_text("name", &raw.name)?,
        category: parse_text("category", &raw.category)?,
        location: parse_text("location", &raw.location)?,
        year,
        daily_price,
        old_daily_price: raw.old_daily_price,
    })
}

// ── Queries ──────────────────────────────────────────────────────

/// Availability search parameters, all optional strings as in a query string.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSearch {
    pub location: Option<String>,
    pub category: Option<String>,
    pub budget: Option<String>,
    pub rental_days: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// The daily ceiling is `budget / rentalDays`; without `rentalDays` the window
/// length is used, and without a window the whole budget is one day.
pub fn parse_search(raw: &RawSearch) -> Result<SearchQuery, ValidationError> {
    let window = match (non_empty(&raw.from_date), non_empty(&raw.to_date)) {
        (Some(from), Some(to)) => Some(parse_interval(&from, &to)?),
        (None, None) => None,
        (None, Some(_)) => return Err(ValidationError::Missing("fromDate")),
        (Some(_), None) => return Err(ValidationError::Missing("toDate")),
    };

    let max_daily_price = match non_empty(&raw.budget) {
        None => None,
        Some(budget_raw) => {
            let budget: f64 = parse_number("budget", &budget_raw)?;
            if !budget.is_finite() || budget < 0.0 {
                return Err(ValidationError::BadNumber {
                    field: "budget",
                    value: clip(&budget_raw),
                });
            }
            let days = match non_empty(&raw.rental_days) {
                Some(d) => {
                    let days: i64 = parse_number("rentalDays", &d)?;
                    if days < 1 {
                        return Err(ValidationError::BadNumber {
                            field: "rentalDays",
                            value: clip(&d),
                        });
                    }
                    days
                }
                None => window.map_or(1, |w| w.rental_days()),
            };
            Some((budget / days as f64).floor().min(u32::MAX as f64) as u32)
        }
    };

    Ok(SearchQuery {
        location: non_empty(&raw.location),
        category: non_empty(&raw.category),
        window,
        max_daily_price,
    })
}

/// Calendar window for free-window queries.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWindow {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub min_days: Option<String>,
}

pub fn parse_window(raw: &RawWindow) -> Result<(DateSpan, Option<i64>), ValidationError> {
    let first = parse_date("fromDate", required("fromDate", &raw.from_date)?)?;
    let last = parse_date("toDate", required("toDate", &raw.to_date)?)?;
    if first > last {
        return Err(ValidationError::Reversed { first, last });
    }
    let window = DateSpan::new(first, last);
    if window.day_count() > MAX_QUERY_WINDOW_DAYS {
        return Err(ValidationError::TooLong("query window"));
    }
    let min_days = match non_empty(&raw.min_days) {
        Some(m) => Some(parse_number::<i64>("minDays", &m)?),
        None => None,
    };
    Ok((window, min_days))
}
