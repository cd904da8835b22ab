use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::wal::Wal;

use super::store::{apply_to_car, ReservationStore};
use super::StoreError;

pub type SharedCar = Arc<RwLock<Car>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that queue up while one is being written are
/// flushed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no half-written bytes linger in
    // the buffer for the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| StoreError::Closed)?;
    rx.await
        .map_err(|_| StoreError::Closed)?
        .map_err(|e| StoreError::Io(e.to_string()))
}

/// Cars in memory, every change logged to the WAL before it is applied.
///
/// Each car sits behind its own `RwLock`. Writers take the write guard before
/// the WAL append and release it after the in-memory apply, so readers never
/// see the log and memory disagree. The append runs on a spawned task holding
/// that guard: a caller that stops waiting (timeout) cannot leave a logged
/// event unapplied.
///
/// Every logged change also holds `gate` for reading from before its append
/// until it is applied. Compaction takes it for writing, so its snapshot and
/// the log swap see no change in between.
pub struct WalStore {
    cars: Arc<DashMap<CarId, SharedCar>>,
    wal_tx: mpsc::Sender<WalCommand>,
    gate: Arc<RwLock<()>>,
}

impl WalStore {
    /// Replay the log at `path` and start the writer. Needs a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&path)?;
        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let cars: DashMap<CarId, SharedCar> = DashMap::new();
        let mut replayed = 0usize;
        for event in events {
            match event {
                Event::CarRegistered { info } => {
                    cars.insert(info.id, Arc::new(RwLock::new(Car::new(info))));
                }
                Event::CarRemoved { id } => {
                    cars.remove(&id);
                }
                other => {
                    if let Some(entry) = cars.get(&other.car_id()) {
                        // Sole owner during replay: the lock is never contended.
                        if let Ok(mut car) = entry.value().try_write() {
                            apply_to_car(&mut car, &other);
                        }
                    }
                }
            }
            replayed += 1;
        }
        tracing::info!(
            "replayed {replayed} events from {}: {} cars",
            path.display(),
            cars.len()
        );

        Ok(Self {
            cars: Arc::new(cars),
            wal_tx,
            gate: Arc::new(RwLock::new(())),
        })
    }

    fn get(&self, id: &CarId) -> Option<SharedCar> {
        self.cars.get(id).map(|e| e.value().clone())
    }

    fn shared_cars(&self) -> Vec<SharedCar> {
        self.cars.iter().map(|e| e.value().clone()).collect()
    }

    /// Log `event` and apply it to `car` under its write lock.
    async fn persist_and_apply(&self, car: SharedCar, event: Event) -> Result<(), StoreError> {
        // Gate before car: compaction takes them in the same order.
        let gate = self.gate.clone().read_owned().await;
        let mut guard = car.write_owned().await;
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            let _gate = gate;
            wal_append(&wal_tx, event.clone()).await?;
            apply_to_car(&mut guard, &event);
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io(format!("persist task failed: {e}")))?
    }

    /// Rewrite the log as the minimal event list recreating current state.
    /// Changes wait until the rewritten log is in place.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();
        for car in self.shared_cars() {
            let guard = car.read().await;
            events.push(Event::CarRegistered {
                info: guard.info.clone(),
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCommitted {
                id: r.id,
                car_id: r.car_id,
                interval: r.interval,
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, StoreError> {
        match self.get(&id) {
            Some(car) => Ok(Some(car.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        let mut cars = Vec::new();
        for car in self.shared_cars() {
            cars.push(car.read().await.clone());
        }
        Ok(cars)
    }

    async fn insert_car(&self, info: CarInfo) -> Result<(), StoreError> {
        let id = info.id;
        let gate = self.gate.clone().read_owned().await;
        if self.cars.contains_key(&id) {
            return Err(StoreError::DuplicateCar(id));
        }
        let (cars, wal_tx) = (self.cars.clone(), self.wal_tx.clone());
        tokio::spawn(async move {
            let _gate = gate;
            wal_append(&wal_tx, Event::CarRegistered { info: info.clone() }).await?;
            cars.insert(id, Arc::new(RwLock::new(Car::new(info))));
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io(format!("persist task failed: {e}")))?
    }

    async fn remove_car(&self, id: CarId) -> Result<(), StoreError> {
        let gate = self.gate.clone().read_owned().await;
        let car = self.get(&id).ok_or(StoreError::UnknownCar(id))?;
        // Wait out in-flight appends on this car.
        let guard = car.write_owned().await;
        let (cars, wal_tx) = (self.cars.clone(), self.wal_tx.clone());
        tokio::spawn(async move {
            let (_gate, _guard) = (gate, guard);
            wal_append(&wal_tx, Event::CarRemoved { id }).await?;
            cars.remove(&id);
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io(format!("persist task failed: {e}")))?
    }

    async fn append_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let car = self
            .get(&reservation.car_id)
            .ok_or(StoreError::UnknownCar(reservation.car_id))?;
        let event = Event::ReservationCommitted {
            id: reservation.id,
            car_id: reservation.car_id,
            interval: reservation.interval,
        };
        self.persist_and_apply(car, event).await
    }

    async fn remove_reservation(
        &self,
        car_id: CarId,
        reservation_id: ReservationId,
    ) -> Result<bool, StoreError> {
        let car = self.get(&car_id).ok_or(StoreError::UnknownCar(car_id))?;
        if !car
            .read()
            .await
            .reservations
            .iter()
            .any(|r| r.id == reservation_id)
        {
            return Ok(false);
        }
        let event = Event::ReservationCancelled {
            id: reservation_id,
            car_id,
        };
        self.persist_and_apply(car, event).await?;
        Ok(true)
    }

    fn car_count(&self) -> usize {
        self.cars.len()
    }
}
