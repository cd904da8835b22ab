use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

use super::availability::{free_windows, is_available, is_date_taken};
use super::{BookingError, BookingService};

impl BookingService {
    pub async fn fetch_car(&self, car_id: CarId) -> Result<Car, BookingError> {
        self.load_car(car_id).await
    }

    /// Every car, optionally narrowed to one category, in id order.
    pub async fn list_cars(&self, category: Option<&str>) -> Result<Vec<Car>, BookingError> {
        let mut cars = self.bounded("load", self.store.list_cars()).await?;
        if let Some(category) = category {
            cars.retain(|c| c.info.category == category);
        }
        cars.sort_by_key(|c| c.id());
        Ok(cars)
    }

    pub async fn locations(&self) -> Result<Vec<String>, BookingError> {
        let cars = self.bounded("load", self.store.list_cars()).await?;
        let distinct: BTreeSet<String> = cars.into_iter().map(|c| c.info.location).collect();
        Ok(distinct.into_iter().collect())
    }

    /// Categories on offer, optionally only at one location.
    pub async fn categories(&self, location: Option<&str>) -> Result<Vec<String>, BookingError> {
        let cars = self.bounded("load", self.store.list_cars()).await?;
        let distinct: BTreeSet<String> = cars
            .into_iter()
            .filter(|c| location.is_none_or(|l| c.info.location == l))
            .map(|c| c.info.category)
            .collect();
        Ok(distinct.into_iter().collect())
    }

    /// Cars matching every given filter. With a window, only cars a booking
    /// for exactly that window would succeed on are returned.
    pub async fn search_available(&self, query: &SearchQuery) -> Result<Vec<Car>, BookingError> {
        let mut cars = self.list_cars(query.category.as_deref()).await?;
        cars.retain(|car| {
            if let Some(location) = &query.location
                && &car.info.location != location
            {
                return false;
            }
            if let Some(max) = query.max_daily_price
                && car.info.best_daily_price() > max
            {
                return false;
            }
            match &query.window {
                Some(window) => is_available(car.intervals(), window),
                None => true,
            }
        });
        Ok(cars)
    }

    /// Free stretches of `window` on one car, at least `min_days` long.
    pub async fn free_windows(
        &self,
        car_id: CarId,
        window: DateSpan,
        min_days: Option<i64>,
    ) -> Result<Vec<DateSpan>, BookingError> {
        let car = self.load_car(car_id).await?;
        let mut free = free_windows(car.intervals(), window);
        if let Some(min) = min_days {
            free.retain(|span| span.day_count() >= min);
        }
        Ok(free)
    }

    pub async fn is_date_taken(&self, car_id: CarId, date: NaiveDate) -> Result<bool, BookingError> {
        let car = self.load_car(car_id).await?;
        Ok(is_date_taken(car.intervals(), date))
    }
}
