//! Hard caps applied before anything touches shared state.

/// Registered cars per service instance.
pub const MAX_CARS: usize = 10_000;

/// Reservations kept on a single car.
pub const MAX_RESERVATIONS_PER_CAR: usize = 5_000;

/// Longest single rental, in days.
pub const MAX_RENTAL_DAYS: i64 = 366;

/// Widest calendar window a free-window query may scan, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Name, category and location strings.
pub const MAX_TEXT_LEN: usize = 256;

/// Accepted calendar range for any date (inclusive years).
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Accepted model years for a car.
pub const MIN_MODEL_YEAR: i32 = 1950;
pub const MAX_MODEL_YEAR: i32 = 2100;

/// Daily price ceiling, in whole currency units.
pub const MAX_DAILY_PRICE: u32 = 1_000_000;
