//! Domain types for barvault

pub mod interval;
pub mod range;
pub mod row;

pub use interval::Interval;
pub use range::{insert_range, CachedRange, TimeWindow};
pub use row::{Fields, Row, BASE_FIELDS, CLOSE, HIGH, LOW, OPEN, PRICE_FIELDS, VOLUME};

/// Symbol type alias
pub type Symbol = String;
