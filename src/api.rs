//! JSON over HTTP. Handlers parse loosely typed input through `request`,
//! call the booking service and map `BookingError` onto status codes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::engine::{BookingError, BookingService};
use crate::model::*;
use crate::observability;
use crate::request::{
    parse_date, parse_id, parse_new_car, parse_search, parse_window, RawBookingRequest, RawNewCar,
    RawSearch, RawWindow, ValidationError,
};

type Service = Arc<BookingService>;

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/api/cars", post(register_car).get(list_cars))
        .route("/api/cars/:id", delete(remove_car))
        .route("/api/cars/carId/:id", get(fetch_car))
        .route("/api/cars/locations", get(locations))
        .route("/api/cars/categories", get(categories))
        .route("/api/cars/filter", get(search))
        .route("/api/cars/:id/availability", get(free_windows))
        .route("/api/cars/:id/taken", get(date_taken))
        .route("/api/cars/:id/events", get(events))
        .route("/api/cars/checkAvailabilityAndBook", post(check_availability_and_book))
        .route(
            "/api/cars/:id/reservations/:reservation_id",
            delete(cancel_reservation),
        )
        .route_layer(middleware::from_fn(track_requests))
        .with_state(service)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(observability::HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Errors ───────────────────────────────────────────────────────

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match &self {
            BookingError::InvalidRequest(_)
            | BookingError::Unavailable { .. }
            | BookingError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::AlreadyExists(_) | BookingError::HasReservations(_) => StatusCode::CONFLICT,
            BookingError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_body(&self))).into_response()
    }
}

fn error_body(e: &BookingError) -> Value {
    let mut body = json!({
        "message": e.to_string(),
        "retryable": e.is_retryable(),
    });
    if let BookingError::Unavailable { conflicts, .. } = e {
        body["conflicts"] = json!(conflicts);
    }
    body
}

fn invalid(e: ValidationError) -> BookingError {
    BookingError::InvalidRequest(e)
}

fn json_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, BookingError> {
    serde_json::from_slice(body).map_err(|e| invalid(ValidationError::Malformed(e.to_string())))
}

fn car_id(raw: &str) -> Result<CarId, BookingError> {
    parse_id("id", raw).map_err(invalid)
}

// ── Check-and-book ───────────────────────────────────────────────

async fn check_availability_and_book(
    State(service): State<Service>,
    body: Bytes,
) -> Result<Response, BookingError> {
    let raw = RawBookingRequest::from_json(&body).map_err(invalid)?;
    match service.check_availability_and_book_raw(&raw).await {
        Ok(reservation) => Ok(Json(json!({
            "message": "Car booked successfully",
            "reservation": reservation,
        }))
        .into_response()),
        Err(e) => {
            let BookingError::Unavailable { car_id, .. } = e else {
                return Err(e);
            };
            let mut body = error_body(&e);
            // The list is informational; a failed read only drops it.
            if let Ok(car) = service.fetch_car(car_id).await {
                body["rentalHistory"] = json!(car.reservations);
            }
            Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
        }
    }
}

async fn cancel_reservation(
    State(service): State<Service>,
    Path((id, reservation_id)): Path<(String, String)>,
) -> Result<Json<Reservation>, BookingError> {
    let car_id = car_id(&id)?;
    let reservation_id = parse_id("reservationId", &reservation_id).map_err(invalid)?;
    Ok(Json(service.cancel_reservation(car_id, reservation_id).await?))
}

// ── Catalog ──────────────────────────────────────────────────────

async fn register_car(
    State(service): State<Service>,
    body: Bytes,
) -> Result<(StatusCode, Json<Car>), BookingError> {
    let raw: RawNewCar = json_body(&body)?;
    let info = parse_new_car(&raw).map_err(invalid)?;
    Ok((StatusCode::CREATED, Json(service.register_car(info).await?)))
}

async fn remove_car(
    State(service): State<Service>,
    Path(id): Path<String>,
) -> Result<StatusCode, BookingError> {
    service.remove_car(car_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_car(
    State(service): State<Service>,
    Path(id): Path<String>,
) -> Result<Json<Car>, BookingError> {
    Ok(Json(service.fetch_car(car_id(&id)?).await?))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    category: Option<String>,
    location: Option<String>,
}

impl ListParams {
    fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

async fn list_cars(
    State(service): State<Service>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Car>>, BookingError> {
    Ok(Json(service.list_cars(params.category()).await?))
}

async fn locations(State(service): State<Service>) -> Result<Json<Vec<String>>, BookingError> {
    Ok(Json(service.locations().await?))
}

async fn categories(
    State(service): State<Service>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<String>>, BookingError> {
    Ok(Json(service.categories(params.location()).await?))
}

// ── Availability ─────────────────────────────────────────────────

async fn search(
    State(service): State<Service>,
    Query(raw): Query<RawSearch>,
) -> Result<Json<Vec<Car>>, BookingError> {
    let query = parse_search(&raw).map_err(invalid)?;
    Ok(Json(service.search_available(&query).await?))
}

async fn free_windows(
    State(service): State<Service>,
    Path(id): Path<String>,
    Query(raw): Query<RawWindow>,
) -> Result<Json<Vec<DateSpan>>, BookingError> {
    let car_id = car_id(&id)?;
    let (window, min_days) = parse_window(&raw).map_err(invalid)?;
    Ok(Json(service.free_windows(car_id, window, min_days).await?))
}

#[derive(Debug, Deserialize)]
struct DateParam {
    date: Option<String>,
}

async fn date_taken(
    State(service): State<Service>,
    Path(id): Path<String>,
    Query(param): Query<DateParam>,
) -> Result<Json<Value>, BookingError> {
    let car_id = car_id(&id)?;
    let raw = param
        .date
        .ok_or(ValidationError::Missing("date"))
        .map_err(invalid)?;
    let date = parse_date("date", &raw).map_err(invalid)?;
    let taken = service.is_date_taken(car_id, date).await?;
    Ok(Json(json!({ "date": date, "taken": taken })))
}

// ── Notifications ────────────────────────────────────────────────

async fn events(
    State(service): State<Service>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, BookingError> {
    let car_id = car_id(&id)?;
    // Check first: subscribing creates the car's channel.
    service.fetch_car(car_id).await?;
    let rx = service.subscribe(car_id);
    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

/// Ends when the car's channel closes. Lagging subscribers skip what they
/// missed.
fn event_stream(rx: broadcast::Receiver<Event>) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(sse_event(&event)), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("sse subscriber lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

fn sse_event(event: &Event) -> SseEvent {
    let (name, data) = match event {
        Event::ReservationCommitted {
            id,
            car_id,
            interval,
        } => (
            "reservation_committed",
            json!({
                "id": id,
                "carId": car_id,
                "fromDate": interval.from_date(),
                "toDate": interval.to_date(),
            }),
        ),
        Event::ReservationCancelled { id, car_id } => (
            "reservation_cancelled",
            json!({ "id": id, "carId": car_id }),
        ),
        Event::CarRegistered { info } => ("car_registered", json!(info)),
        Event::CarRemoved { id } => ("car_removed", json!({ "carId": id })),
    };
    SseEvent::default().event(name).data(data.to_string())
}
