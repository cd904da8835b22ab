use super::*;
use crate::request::{BookingRequest, RawBookingRequest, ValidationError};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use ulid::Ulid;

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, m, day).unwrap()
}

fn iv(from: NaiveDate, to: NaiveDate) -> Interval {
    Interval::new(from, to).unwrap()
}

fn span(first: NaiveDate, last: NaiveDate) -> DateSpan {
    DateSpan::new(first, last)
}

fn car_info(id: Ulid, category: &str, location: &str, price: u32) -> CarInfo {
    CarInfo {
        id,
        name: format!("{category} car"),
        category: category.into(),
        location: location.into(),
        year: 2022,
        daily_price: price,
        old_daily_price: None,
    }
}

fn request(car_id: CarId, from: NaiveDate, to: NaiveDate) -> BookingRequest {
    BookingRequest {
        car_id,
        interval: iv(from, to),
    }
}

fn service_over(store: Arc<dyn ReservationStore>) -> BookingService {
    BookingService::new(store, Arc::new(NotifyHub::new()), Duration::from_secs(5))
}

fn in_memory_service() -> BookingService {
    service_over(Arc::new(InMemoryStore::new()))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("carbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn service_with_car(service: &BookingService) -> CarId {
    let id = Ulid::new();
    service
        .register_car(car_info(id, "compact", "Berlin", 40))
        .await
        .unwrap();
    id
}

// ── Pure availability ────────────────────────────────────

#[test]
fn empty_history_is_available() {
    assert!(is_available(std::iter::empty(), &iv(d(3, 1), d(3, 2))));
}

#[test]
fn touching_dates_conflict() {
    let booked = [iv(d(3, 1), d(3, 5))];
    assert!(!is_available(&booked, &iv(d(3, 5), d(3, 8))));
    assert!(!is_available(&booked, &iv(d(2, 20), d(3, 1))));
    assert!(is_available(&booked, &iv(d(3, 6), d(3, 8))));
    assert!(is_available(&booked, &iv(d(2, 20), d(2, 28))));
}

#[test]
fn containment_conflicts_both_ways() {
    let booked = [iv(d(3, 1), d(3, 10))];
    assert!(!is_available(&booked, &iv(d(3, 3), d(3, 4))));
    assert!(!is_available(&booked, &iv(d(2, 1), d(4, 1))));
}

#[test]
fn availability_ignores_order() {
    let forward = [iv(d(1, 1), d(1, 3)), iv(d(5, 1), d(5, 3))];
    let backward = [forward[1], forward[0]];
    let candidate = iv(d(5, 3), d(5, 9));
    assert_eq!(
        is_available(&forward, &candidate),
        is_available(&backward, &candidate)
    );
}

#[test]
fn conflicts_lists_only_colliding_reservations() {
    let car_id = Ulid::new();
    let hit = Reservation {
        id: Ulid::new(),
        car_id,
        interval: iv(d(3, 1), d(3, 5)),
    };
    let miss = Reservation {
        id: Ulid::new(),
        car_id,
        interval: iv(d(4, 1), d(4, 5)),
    };
    let found = conflicts(&[hit.clone(), miss], &iv(d(3, 4), d(3, 20)));
    assert_eq!(found, vec![hit]);
}

#[test]
fn date_taken_includes_endpoints() {
    let booked = [iv(d(3, 1), d(3, 5))];
    assert!(is_date_taken(&booked, d(3, 1)));
    assert!(is_date_taken(&booked, d(3, 5)));
    assert!(!is_date_taken(&booked, d(3, 6)));
    assert!(!is_date_taken(&booked, d(2, 28)));
}

#[test]
fn merge_joins_adjacent_and_overlapping() {
    let merged = merge_day_spans(&[
        span(d(1, 1), d(1, 3)),
        span(d(1, 4), d(1, 6)),
        span(d(1, 5), d(1, 9)),
        span(d(1, 20), d(1, 21)),
    ]);
    assert_eq!(merged, vec![span(d(1, 1), d(1, 9)), span(d(1, 20), d(1, 21))]);
}

#[test]
fn free_windows_subtract_reservations() {
    let booked = [iv(d(3, 5), d(3, 7)), iv(d(3, 10), d(3, 12))];
    let free = free_windows(&booked, span(d(3, 1), d(3, 31)));
    assert_eq!(
        free,
        vec![
            span(d(3, 1), d(3, 4)),
            span(d(3, 8), d(3, 9)),
            span(d(3, 13), d(3, 31)),
        ]
    );
}

#[test]
fn free_windows_clip_to_window() {
    let booked = [iv(d(2, 20), d(3, 3)), iv(d(3, 28), d(4, 10))];
    let free = free_windows(&booked, span(d(3, 1), d(3, 31)));
    assert_eq!(free, vec![span(d(3, 4), d(3, 27))]);
}

#[test]
fn free_windows_fully_booked_is_empty() {
    let booked = [iv(d(2, 1), d(4, 1))];
    assert!(free_windows(&booked, span(d(3, 1), d(3, 31))).is_empty());
}

#[test]
fn free_windows_agree_with_booking_check() {
    let booked = [iv(d(3, 5), d(3, 7)), iv(d(3, 15), d(3, 16))];
    for window in free_windows(&booked, span(d(3, 1), d(3, 31))) {
        if window.day_count() >= 2 {
            assert!(is_available(&booked, &iv(window.first, window.last)));
        }
        for taken in [window.first.pred_opt().unwrap(), window.last.succ_opt().unwrap()] {
            if taken >= d(3, 1) && taken <= d(3, 31) {
                assert!(is_date_taken(&booked, taken));
            }
        }
    }
}

#[test]
fn phase_settles_by_outcome() {
    let car_id = Ulid::new();
    let ok = Ok(Reservation {
        id: Ulid::new(),
        car_id,
        interval: iv(d(1, 1), d(1, 2)),
    });
    assert_eq!(BookingPhase::settle(&ok), BookingPhase::Booked);
    let failed = Err(BookingError::StorageFailure("disk".into()));
    assert_eq!(BookingPhase::settle(&failed), BookingPhase::Failed);
    let rejected = Err(BookingError::Unavailable {
        car_id,
        requested: iv(d(1, 1), d(1, 2)),
        conflicts: vec![],
    });
    assert_eq!(BookingPhase::settle(&rejected), BookingPhase::Rejected);
    assert_eq!(
        BookingPhase::settle(&Err(BookingError::NotFound(car_id))),
        BookingPhase::Rejected
    );
}

#[test]
fn only_storage_failures_are_retryable() {
    assert!(BookingError::StorageFailure("x".into()).is_retryable());
    assert!(!BookingError::NotFound(Ulid::new()).is_retryable());
    assert!(!BookingError::InvalidRequest(ValidationError::Missing("toDate")).is_retryable());
}

// ── Check-and-book ───────────────────────────────────────

#[tokio::test]
async fn book_reject_overlap_then_book_after() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;

    let first = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();

    let result = service
        .check_availability_and_book(request(car_id, d(3, 3), d(3, 4)))
        .await;
    match result {
        Err(BookingError::Unavailable { conflicts, .. }) => {
            assert_eq!(conflicts, vec![first.clone()]);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }

    let second = service
        .check_availability_and_book(request(car_id, d(3, 6), d(3, 9)))
        .await
        .unwrap();

    let car = service.fetch_car(car_id).await.unwrap();
    assert_eq!(car.reservations, vec![first, second]);
}

#[tokio::test]
async fn boundary_day_is_unavailable() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();

    let result = service
        .check_availability_and_book(request(car_id, d(3, 5), d(3, 7)))
        .await;
    assert!(matches!(result, Err(BookingError::Unavailable { .. })));
}

#[tokio::test]
async fn same_day_request_is_invalid_and_changes_nothing() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;

    let raw = RawBookingRequest {
        resource_id: Some(car_id.to_string()),
        from_date: Some("2030-03-01".into()),
        to_date: Some("2030-03-01".into()),
    };
    let result = service.check_availability_and_book_raw(&raw).await;
    assert!(matches!(
        result,
        Err(BookingError::InvalidRequest(ValidationError::NotIncreasing(_)))
    ));
    assert!(service.fetch_car(car_id).await.unwrap().reservations.is_empty());
}

#[tokio::test]
async fn malformed_car_id_is_invalid() {
    let service = in_memory_service();
    let raw = RawBookingRequest {
        resource_id: Some("not-a-car".into()),
        from_date: Some("2030-03-01".into()),
        to_date: Some("2030-03-02".into()),
    };
    let result = service.check_availability_and_book_raw(&raw).await;
    assert!(matches!(
        result,
        Err(BookingError::InvalidRequest(ValidationError::BadId { .. }))
    ));
}

#[tokio::test]
async fn unknown_car_is_not_found() {
    let service = in_memory_service();
    let ghost = Ulid::new();
    let result = service
        .check_availability_and_book(request(ghost, d(3, 1), d(3, 2)))
        .await;
    assert!(matches!(result, Err(BookingError::NotFound(id)) if id == ghost));
}

#[tokio::test]
async fn concurrent_identical_requests_book_once_in_memory() {
    let service = Arc::new(in_memory_service());
    let car_id = service_with_car(&service).await;
    assert_eq!(race_identical_bookings(service.clone(), car_id, 16).await, 1);
    assert_eq!(service.fetch_car(car_id).await.unwrap().reservations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_book_once_on_wal() {
    let path = test_wal_path("race.wal");
    let service = Arc::new(service_over(Arc::new(WalStore::open(path).unwrap())));
    let car_id = service_with_car(&service).await;
    assert_eq!(race_identical_bookings(service.clone(), car_id, 16).await, 1);
    assert_eq!(service.fetch_car(car_id).await.unwrap().reservations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_requests_leave_disjoint_history() {
    let service = Arc::new(in_memory_service());
    let car_id = service_with_car(&service).await;

    let mut handles = Vec::new();
    for offset in 0..10u32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .check_availability_and_book(request(car_id, d(5, 1 + offset), d(5, 4 + offset)))
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let car = service.fetch_car(car_id).await.unwrap();
    assert!(!car.reservations.is_empty());
    for (i, a) in car.reservations.iter().enumerate() {
        for b in &car.reservations[i + 1..] {
            assert!(!overlaps(&a.interval, &b.interval));
        }
    }
}

/// Fire `n` identical requests at once; returns how many were booked.
async fn race_identical_bookings(service: Arc<BookingService>, car_id: CarId, n: usize) -> usize {
    let mut handles = Vec::new();
    for _ in 0..n {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .check_availability_and_book(request(car_id, d(7, 1), d(7, 5)))
                .await
        }));
    }
    let mut booked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(BookingError::Unavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    booked
}

// ── Storage failures ─────────────────────────────────────

/// Delegates everything but reservation appends, which fail outright or
/// stall before landing.
struct FaultyStore<S> {
    inner: S,
    fail: bool,
    stall: Duration,
    stalls_left: AtomicUsize,
}

impl<S> FaultyStore<S> {
    fn failing(inner: S) -> Self {
        Self {
            inner,
            fail: true,
            stall: Duration::ZERO,
            stalls_left: AtomicUsize::new(0),
        }
    }

    /// The next `times` appends sleep for `stall` first.
    fn stalling(inner: S, stall: Duration, times: usize) -> Self {
        Self {
            inner,
            fail: false,
            stall,
            stalls_left: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl<S: ReservationStore> ReservationStore for FaultyStore<S> {
    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, StoreError> {
        self.inner.fetch_car(id).await
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        self.inner.list_cars().await
    }

    async fn insert_car(&self, info: CarInfo) -> Result<(), StoreError> {
        self.inner.insert_car(info).await
    }

    async fn remove_car(&self, id: CarId) -> Result<(), StoreError> {
        self.inner.remove_car(id).await
    }

    async fn append_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Io("disk full".into()));
        }
        let stalled = self
            .stalls_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            tokio::time::sleep(self.stall).await;
        }
        self.inner.append_reservation(reservation).await
    }

    async fn remove_reservation(
        &self,
        car_id: CarId,
        reservation_id: ReservationId,
    ) -> Result<bool, StoreError> {
        self.inner.remove_reservation(car_id, reservation_id).await
    }

    fn car_count(&self) -> usize {
        self.inner.car_count()
    }
}

#[tokio::test]
async fn failing_store_is_storage_failure_not_rejection() {
    let service = service_over(Arc::new(FaultyStore::failing(InMemoryStore::new())));
    let car_id = service_with_car(&service).await;

    let result = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 2)))
        .await;
    assert!(matches!(result, Err(BookingError::StorageFailure(_))));
    assert_eq!(BookingPhase::settle(&result), BookingPhase::Failed);
    assert!(result.unwrap_err().is_retryable());
    assert!(service.fetch_car(car_id).await.unwrap().reservations.is_empty());
}

#[tokio::test]
async fn stalled_store_times_out_as_storage_failure() {
    let store = FaultyStore::stalling(InMemoryStore::new(), Duration::from_millis(300), 1);
    let service = BookingService::new(
        Arc::new(store),
        Arc::new(NotifyHub::new()),
        Duration::from_millis(50),
    );
    let car_id = service_with_car(&service).await;
    let mut rx = service.subscribe(car_id);

    let result = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 2)))
        .await;
    match result {
        Err(BookingError::StorageFailure(msg)) => assert!(msg.contains("timed out")),
        other => panic!("expected StorageFailure, got {other:?}"),
    }

    // The stalled append lands later; a failed booking must not stay committed.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(service.fetch_car(car_id).await.unwrap().reservations.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_booking_retry_books_on_wal() {
    let path = test_wal_path("timeout_retry.wal");
    let store = FaultyStore::stalling(
        WalStore::open(path.clone()).unwrap(),
        Duration::from_millis(300),
        1,
    );
    let service = BookingService::new(
        Arc::new(store),
        Arc::new(NotifyHub::new()),
        Duration::from_millis(100),
    );
    let car_id = service_with_car(&service).await;

    let first = service
        .check_availability_and_book(request(car_id, d(4, 1), d(4, 5)))
        .await;
    assert!(matches!(first, Err(BookingError::StorageFailure(_))));

    // Retrying at once waits for the abandoned append to settle and be undone.
    let retry = service
        .check_availability_and_book(request(car_id, d(4, 1), d(4, 5)))
        .await
        .unwrap();
    let car = service.fetch_car(car_id).await.unwrap();
    assert_eq!(car.reservations, vec![retry.clone()]);

    let reopened = WalStore::open(path).unwrap();
    let car = reopened.fetch_car(car_id).await.unwrap().unwrap();
    assert_eq!(car.reservations, vec![retry]);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_store_survives_restart() {
    let path = test_wal_path("restart.wal");
    let car_id = Ulid::new();
    let (first, second) = {
        let service = service_over(Arc::new(WalStore::open(path.clone()).unwrap()));
        service
            .register_car(car_info(car_id, "suv", "Lyon", 90))
            .await
            .unwrap();
        let first = service
            .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
            .await
            .unwrap();
        let second = service
            .check_availability_and_book(request(car_id, d(3, 6), d(3, 9)))
            .await
            .unwrap();
        (first, second)
    };

    let service = service_over(Arc::new(WalStore::open(path).unwrap()));
    let car = service.fetch_car(car_id).await.unwrap();
    assert_eq!(car.info.location, "Lyon");
    assert_eq!(car.reservations, vec![first, second]);

    let result = service
        .check_availability_and_book(request(car_id, d(3, 4), d(3, 6)))
        .await;
    assert!(matches!(result, Err(BookingError::Unavailable { .. })));
}

#[tokio::test]
async fn wal_store_replays_cancellation_and_removal() {
    let path = test_wal_path("cancel_remove.wal");
    let kept_car = Ulid::new();
    let gone_car = Ulid::new();
    {
        let service = service_over(Arc::new(WalStore::open(path.clone()).unwrap()));
        service
            .register_car(car_info(kept_car, "van", "Oslo", 70))
            .await
            .unwrap();
        service
            .register_car(car_info(gone_car, "van", "Oslo", 70))
            .await
            .unwrap();
        let r = service
            .check_availability_and_book(request(kept_car, d(3, 1), d(3, 5)))
            .await
            .unwrap();
        service.cancel_reservation(kept_car, r.id).await.unwrap();
        service.remove_car(gone_car).await.unwrap();
    }

    let service = service_over(Arc::new(WalStore::open(path).unwrap()));
    assert!(service.fetch_car(kept_car).await.unwrap().reservations.is_empty());
    assert!(matches!(
        service.fetch_car(gone_car).await,
        Err(BookingError::NotFound(_))
    ));
}

#[tokio::test]
async fn wal_compaction_resets_counter_and_keeps_state() {
    let path = test_wal_path("compact.wal");
    let store = Arc::new(WalStore::open(path.clone()).unwrap());
    let service = service_over(store.clone());
    let car_id = service_with_car(&service).await;
    let r = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();
    assert_eq!(store.appends_since_compact().await, 2);

    store.compact().await.unwrap();
    assert_eq!(store.appends_since_compact().await, 0);

    let reopened = service_over(Arc::new(WalStore::open(path).unwrap()));
    assert_eq!(reopened.fetch_car(car_id).await.unwrap().reservations, vec![r]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_during_bookings_keeps_every_change() {
    let path = test_wal_path("compact_concurrent.wal");
    let store = Arc::new(WalStore::open(path.clone()).unwrap());
    let service = Arc::new(service_over(store.clone()));

    let mut cars = Vec::new();
    for _ in 0..100 {
        cars.push(service_with_car(&service).await);
    }

    let compactor = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                store.compact().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let mut handles = Vec::new();
    for &car_id in &cars {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .check_availability_and_book(request(car_id, d(8, 1), d(8, 3)))
                .await
                .unwrap();
            service
                .check_availability_and_book(request(car_id, d(8, 10), d(8, 12)))
                .await
                .unwrap();
        }));
    }
    // Catalog changes race the compactor too.
    let late_cars: Vec<CarId> = (0..10).map(|_| Ulid::new()).collect();
    for &car_id in &late_cars {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .register_car(car_info(car_id, "van", "Oslo", 70))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    compactor.await.unwrap();

    let in_memory = service.list_cars(None).await.unwrap();
    assert_eq!(in_memory.len(), 110);
    assert_eq!(
        in_memory.iter().map(|c| c.reservations.len()).sum::<usize>(),
        200
    );

    let reopened = service_over(Arc::new(WalStore::open(path).unwrap()));
    assert_eq!(reopened.list_cars(None).await.unwrap(), in_memory);
}

// ── Cancellation and catalog ─────────────────────────────

#[tokio::test]
async fn cancel_frees_dates_for_rebooking() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let r = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();

    let cancelled = service.cancel_reservation(car_id, r.id).await.unwrap();
    assert_eq!(cancelled, r);
    service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_unknown_reservation_is_not_found() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let missing = Ulid::new();
    let result = service.cancel_reservation(car_id, missing).await;
    assert!(matches!(result, Err(BookingError::NotFound(id)) if id == missing));
}

#[tokio::test]
async fn duplicate_car_rejected() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let result = service
        .register_car(car_info(car_id, "compact", "Berlin", 40))
        .await;
    assert!(matches!(result, Err(BookingError::AlreadyExists(id)) if id == car_id));
}

#[tokio::test]
async fn remove_car_refused_with_upcoming_reservation() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let future = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
    service
        .check_availability_and_book(request(car_id, future, future.succ_opt().unwrap()))
        .await
        .unwrap();

    let result = service.remove_car(car_id).await;
    assert!(matches!(result, Err(BookingError::HasReservations(_))));
    assert!(service.fetch_car(car_id).await.is_ok());
}

#[tokio::test]
async fn remove_car_allowed_with_past_reservations() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let past = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
    service
        .check_availability_and_book(request(car_id, past, past.succ_opt().unwrap()))
        .await
        .unwrap();

    service.remove_car(car_id).await.unwrap();
    assert!(matches!(
        service.fetch_car(car_id).await,
        Err(BookingError::NotFound(_))
    ));
    assert!(matches!(
        service.remove_car(car_id).await,
        Err(BookingError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn car_cap_holds_under_concurrent_registration() {
    let service = Arc::new(in_memory_service().with_max_cars(3));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .register_car(car_info(Ulid::new(), "compact", "Berlin", 40))
                .await
        }));
    }
    let mut registered = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => registered += 1,
            Err(BookingError::LimitExceeded(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(registered, 3);
    assert_eq!(service.list_cars(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn forget_lock_keeps_a_lock_still_in_use() {
    let service = in_memory_service();
    let car_id = Ulid::new();

    let held = service.lock_car(car_id).await;
    service.forget_lock(&car_id);
    assert!(service.locks.contains_key(&car_id));

    drop(held);
    service.forget_lock(&car_id);
    assert!(!service.locks.contains_key(&car_id));
}

#[tokio::test]
async fn removed_car_id_can_be_registered_again() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    service.remove_car(car_id).await.unwrap();

    service
        .register_car(car_info(car_id, "suv", "Lyon", 90))
        .await
        .unwrap();
    service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();
    assert_eq!(service.fetch_car(car_id).await.unwrap().info.location, "Lyon");
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn booking_notifies_subscribers() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    let mut rx = service.subscribe(car_id);

    let r = service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::ReservationCommitted {
            id: r.id,
            car_id,
            interval: r.interval,
        }
    );

    service.cancel_reservation(car_id, r.id).await.unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::ReservationCancelled { id: r.id, car_id }
    );
}

#[tokio::test]
async fn rejected_booking_sends_nothing() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    service
        .check_availability_and_book(request(car_id, d(3, 1), d(3, 5)))
        .await
        .unwrap();
    let mut rx = service.subscribe(car_id);

    let _ = service
        .check_availability_and_book(request(car_id, d(3, 2), d(3, 3)))
        .await;
    assert!(rx.try_recv().is_err());
}

// ── Queries ──────────────────────────────────────────────

async fn fleet(service: &BookingService) -> (CarId, CarId, CarId) {
    let a = Ulid::new();
    let b = Ulid::new();
    let c = Ulid::new();
    service.register_car(car_info(a, "compact", "Berlin", 40)).await.unwrap();
    service.register_car(car_info(b, "suv", "Berlin", 120)).await.unwrap();
    let mut discounted = car_info(c, "suv", "Paris", 150);
    discounted.old_daily_price = Some(95);
    service.register_car(discounted).await.unwrap();
    (a, b, c)
}

#[tokio::test]
async fn catalog_listing_and_facets() {
    let service = in_memory_service();
    let (a, b, c) = fleet(&service).await;

    let mut all = vec![a, b, c];
    all.sort();
    let listed: Vec<CarId> = service
        .list_cars(None)
        .await
        .unwrap()
        .iter()
        .map(Car::id)
        .collect();
    assert_eq!(listed, all);

    let suvs = service.list_cars(Some("suv")).await.unwrap();
    assert_eq!(suvs.len(), 2);

    assert_eq!(service.locations().await.unwrap(), vec!["Berlin", "Paris"]);
    assert_eq!(
        service.categories(Some("Berlin")).await.unwrap(),
        vec!["compact", "suv"]
    );
    assert_eq!(service.categories(Some("Paris")).await.unwrap(), vec!["suv"]);
    assert!(service.categories(Some("Rome")).await.unwrap().is_empty());
}

#[tokio::test]
async fn search_filters_by_price_and_window() {
    let service = in_memory_service();
    let (a, b, c) = fleet(&service).await;
    service
        .check_availability_and_book(request(a, d(6, 1), d(6, 10)))
        .await
        .unwrap();

    let by_price = SearchQuery {
        max_daily_price: Some(100),
        ..Default::default()
    };
    let mut ids: Vec<CarId> = service
        .search_available(&by_price)
        .await
        .unwrap()
        .iter()
        .map(Car::id)
        .collect();
    ids.sort();
    let mut expected = vec![a, c];
    expected.sort();
    assert_eq!(ids, expected);

    let window = iv(d(6, 10), d(6, 12));
    let in_berlin = SearchQuery {
        location: Some("Berlin".into()),
        window: Some(window),
        ..Default::default()
    };
    let found = service.search_available(&in_berlin).await.unwrap();
    assert_eq!(found.iter().map(Car::id).collect::<Vec<_>>(), vec![b]);

    // Whatever search returns must be bookable for the same window.
    for car in found {
        service
            .check_availability_and_book(BookingRequest {
                car_id: car.id(),
                interval: window,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn calendar_queries_match_reservations() {
    let service = in_memory_service();
    let car_id = service_with_car(&service).await;
    service
        .check_availability_and_book(request(car_id, d(3, 5), d(3, 7)))
        .await
        .unwrap();

    assert!(service.is_date_taken(car_id, d(3, 5)).await.unwrap());
    assert!(service.is_date_taken(car_id, d(3, 7)).await.unwrap());
    assert!(!service.is_date_taken(car_id, d(3, 8)).await.unwrap());

    let all = service
        .free_windows(car_id, span(d(3, 1), d(3, 10)), None)
        .await
        .unwrap();
    assert_eq!(all, vec![span(d(3, 1), d(3, 4)), span(d(3, 8), d(3, 10))]);

    let long = service
        .free_windows(car_id, span(d(3, 1), d(3, 10)), Some(4))
        .await
        .unwrap();
    assert_eq!(long, vec![span(d(3, 1), d(3, 4))]);

    assert!(matches!(
        service.is_date_taken(Ulid::new(), d(3, 5)).await,
        Err(BookingError::NotFound(_))
    ));
}
