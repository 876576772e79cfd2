//! Market data sources and the gateway that fetches gaps from them.

pub mod binance;
pub mod circuit_breaker;
pub mod gateway;
pub mod http;
pub mod provider;
pub mod synthetic;
pub mod yahoo;

pub use binance::BinanceSource;
pub use circuit_breaker::CircuitBreaker;
pub use gateway::FetchGateway;
pub use provider::{MarketDataSource, SourceError};
pub use synthetic::SyntheticSource;
pub use yahoo::YahooSource;
