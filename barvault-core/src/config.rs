//! Engine configuration loaded from TOML.
//!
//! ```toml
//! parallel = true
//!
//! [store]
//! backend = "parquet"
//! dir = "data/cache"
//!
//! [lookback]
//! policy = "truncate"
//! padding = 1.5
//!
//! [logging]
//! level = "info"
//! format = "compact"
//!
//! [sources.yahoo]
//! type = "yahoo"
//!
//! [sources.offline]
//! type = "synthetic"
//! seed = 42
//!
//! [[instruments]]
//! name = "SPY-QQQ"
//! kind = "spread"
//! inputs = [{ symbol = "SPY" }, { symbol = "QQQ", weight = 0.8 }]
//!
//! [[features]]
//! symbol = "SPY"
//! calculator = "sma"
//! params = { period = 20 }
//! ```

use crate::data::{BinanceSource, CircuitBreaker, MarketDataSource, SourceError, SyntheticSource, YahooSource};
use crate::error::Result;
use crate::features::{create_calculator, FeatureConfig, FeatureSpec, LookbackPolicy};
use crate::graph::{InstrumentInput, InstrumentKind, InstrumentSpec};
use crate::logging::LogConfig;
use crate::manager::{DataManager, ManagerOptions};
use crate::store::{MemoryRangeStore, ParquetRangeStore, RangeStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown feature calculator '{0}'")]
    UnknownCalculator(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to build source: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Parquet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Parquet,
            dir: PathBuf::from("data/cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackConfig {
    pub policy: LookbackPolicy,
    pub padding: f64,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        Self {
            policy: LookbackPolicy::Truncate,
            padding: 1.0,
        }
    }
}

/// A named source entry, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Yahoo {
        #[serde(default)]
        base_url: Option<String>,
    },
    Binance {
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        batch_size: Option<usize>,
    },
    Synthetic {
        #[serde(default)]
        seed: u64,
        #[serde(default)]
        base_price: Option<f64>,
        #[serde(default)]
        skip_weekends: bool,
    },
}

/// `[[instruments]]` entry. Custom combiners can only be registered in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    pub kind: InstrumentKind,
    pub inputs: Vec<InstrumentInput>,
}

impl InstrumentConfig {
    pub fn to_spec(&self) -> std::result::Result<InstrumentSpec, ConfigError> {
        let spec = match self.kind {
            InstrumentKind::Spread => InstrumentSpec::spread(&self.name, self.inputs.clone()),
            InstrumentKind::Weighted => InstrumentSpec::weighted(&self.name, self.inputs.clone()),
            InstrumentKind::Ratio => match self.inputs.as_slice() {
                [numerator, denominator] => {
                    InstrumentSpec::ratio(&self.name, numerator.clone(), denominator.clone())
                }
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "ratio '{}' needs exactly two inputs, got {}",
                        self.name,
                        self.inputs.len()
                    )))
                }
            },
            InstrumentKind::Custom => {
                return Err(ConfigError::Invalid(format!(
                    "instrument '{}': custom combiners must be registered in code",
                    self.name
                )))
            }
        };
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallel: bool,
    pub store: StoreConfig,
    pub lookback: LookbackConfig,
    pub logging: LogConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    pub instruments: Vec<InstrumentConfig>,
    pub features: Vec<FeatureConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            store: StoreConfig::default(),
            lookback: LookbackConfig::default(),
            logging: LogConfig::default(),
            sources: default_sources(),
            instruments: Vec::new(),
            features: Vec::new(),
        }
    }
}

fn default_sources() -> BTreeMap<String, SourceConfig> {
    BTreeMap::from([
        ("yahoo".to_string(), SourceConfig::Yahoo { base_url: None }),
        (
            "binance".to_string(),
            SourceConfig::Binance {
                base_url: None,
                batch_size: None,
            },
        ),
        (
            "synthetic".to_string(),
            SourceConfig::Synthetic {
                seed: 0,
                base_price: None,
                skip_weekends: false,
            },
        ),
    ])
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML. An empty `sources` table falls back to the bundled sources.
    pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(text)?;
        if config.sources.is_empty() {
            config.sources = default_sources();
        }
        if !config.lookback.padding.is_finite() || config.lookback.padding < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "lookback.padding must be >= 1.0, got {}",
                config.lookback.padding
            )));
        }
        Ok(config)
    }

    pub fn options(&self) -> ManagerOptions {
        ManagerOptions {
            lookback_policy: self.lookback.policy,
            lookback_padding: self.lookback.padding,
            parallel: self.parallel,
        }
    }

    fn build_store(&self) -> Arc<dyn RangeStore> {
        match self.store.backend {
            StoreBackend::Memory => Arc::new(MemoryRangeStore::new()),
            StoreBackend::Parquet => Arc::new(ParquetRangeStore::new(&self.store.dir)),
        }
    }

    /// Construct every configured source. HTTP sources share one breaker.
    pub fn build_sources(
        &self,
    ) -> std::result::Result<Vec<(String, Arc<dyn MarketDataSource>)>, ConfigError> {
        let breaker = Arc::new(CircuitBreaker::default_provider());
        let mut built = Vec::with_capacity(self.sources.len());

        for (name, source) in &self.sources {
            let source: Arc<dyn MarketDataSource> = match source {
                SourceConfig::Yahoo { base_url } => {
                    let mut yahoo = YahooSource::new(breaker.clone())?;
                    if let Some(url) = base_url {
                        yahoo = yahoo.with_base_url(url);
                    }
                    Arc::new(yahoo)
                }
                SourceConfig::Binance {
                    base_url,
                    batch_size,
                } => {
                    let mut binance = BinanceSource::new(breaker.clone())?;
                    if let Some(url) = base_url {
                        binance = binance.with_base_url(url);
                    }
                    if let Some(size) = batch_size {
                        binance = binance.with_batch_size(*size);
                    }
                    Arc::new(binance)
                }
                SourceConfig::Synthetic {
                    seed,
                    base_price,
                    skip_weekends,
                } => {
                    let mut synthetic =
                        SyntheticSource::new(*seed).with_weekends_skipped(*skip_weekends);
                    if let Some(price) = base_price {
                        synthetic = synthetic.with_base_price(*price);
                    }
                    Arc::new(synthetic)
                }
            };
            built.push((name.clone(), source));
        }
        Ok(built)
    }

    /// A manager with every configured source, instrument and feature.
    pub fn build(&self) -> Result<DataManager> {
        let mut manager = DataManager::with_options(self.build_store(), self.options());

        for (name, source) in self.build_sources()? {
            manager.register_source(name, source);
        }
        for instrument in &self.instruments {
            manager.register_instrument(instrument.to_spec()?)?;
        }
        for feature in &self.features {
            let calculator = create_calculator(feature)?;
            manager.register_feature(FeatureSpec::new(&feature.symbol, calculator))?;
        }

        info!(
            store = manager.store().name(),
            sources = self.sources.len(),
            instruments = self.instruments.len(),
            features = self.features.len(),
            "engine built"
        );
        Ok(manager)
    }
}
