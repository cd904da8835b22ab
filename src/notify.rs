use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{CarId, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Per-car broadcast of committed events, used to keep calendars fresh.
pub struct NotifyHub {
    channels: DashMap<CarId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a car's events, creating its channel on first use.
    pub fn subscribe(&self, car_id: CarId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(car_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.car_id()) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a car's channel; open receivers see the stream close.
    pub fn remove(&self, car_id: &CarId) {
        self.channels.remove(car_id);
    }
}
