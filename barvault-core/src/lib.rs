//! Barvault Core: incremental market-data cache, gap resolution, derived
//! instruments and feature computation.
//!
//! This crate contains the engine:
//! - Domain types (intervals, rows, time windows, cached ranges)
//! - Gap resolver over cached ranges on the interval grid
//! - Range stores (in-memory and Parquet on disk)
//! - Market data sources and the fetch gateway that only asks for gaps
//! - Instrument graph for spreads, ratios and weighted baskets
//! - Feature pipeline with the standard calculators
//! - `DataManager`, which sequences all of the above per request

pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod gaps;
pub mod graph;
pub mod indicators;
pub mod logging;
pub mod manager;
pub mod store;
pub mod sync;

pub use config::{ConfigError, EngineConfig};
pub use data::{FetchGateway, MarketDataSource, SourceError};
pub use domain::{CachedRange, Interval, Row, TimeWindow};
pub use error::{EngineError, Result};
pub use features::{FeatureConfig, FeaturePipeline, FeatureSpec, LookbackPolicy};
pub use graph::{Combiner, InstrumentGraph, InstrumentInput, InstrumentKind, InstrumentSpec};
pub use indicators::{FeatureCalculator, FeatureColumn};
pub use manager::{DataManager, DataRequest, ManagerOptions, QueryResult};
pub use store::{MemoryRangeStore, ParquetRangeStore, RangeStore, StoreError};
