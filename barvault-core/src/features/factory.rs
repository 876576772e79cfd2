//! Builds feature calculators from config entries.

use crate::config::ConfigError;
use crate::indicators::{Atr, Bollinger, Ema, FeatureCalculator, Macd, Rsi, Sma};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// `[[features]]` entry: which calculator, on which symbol, with what params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub symbol: String,
    pub calculator: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl FeatureConfig {
    pub fn new(symbol: impl Into<String>, calculator: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            calculator: calculator.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// Extract a named f64 parameter, falling back to `default`.
fn param(config: &FeatureConfig, name: &str, default: f64) -> f64 {
    config.params.get(name).copied().unwrap_or(default)
}

/// Extract a named period parameter, falling back to `default`. Must be >= 1.
fn param_usize(config: &FeatureConfig, name: &str, default: usize) -> Result<usize, ConfigError> {
    match config.params.get(name).copied() {
        None => Ok(default),
        Some(v) if v >= 1.0 && v.fract() == 0.0 => Ok(v as usize),
        Some(v) => Err(ConfigError::Invalid(format!(
            "{} on {}: {name} must be a positive integer, got {v}",
            config.calculator, config.symbol
        ))),
    }
}

pub fn create_calculator(config: &FeatureConfig) -> Result<Arc<dyn FeatureCalculator>, ConfigError> {
    let calculator: Arc<dyn FeatureCalculator> = match config.calculator.as_str() {
        "sma" => Arc::new(Sma::new(param_usize(config, "period", 20)?)),
        "ema" => Arc::new(Ema::new(param_usize(config, "period", 20)?)),
        "rsi" => Arc::new(Rsi::new(param_usize(config, "period", 14)?)),
        "atr" => Arc::new(Atr::new(param_usize(config, "period", 14)?)),
        "bollinger" => {
            let period = param_usize(config, "period", 20)?;
            let multiplier = param(config, "multiplier", 2.0);
            if !multiplier.is_finite() || multiplier < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "bollinger on {}: multiplier must be >= 0, got {multiplier}",
                    config.symbol
                )));
            }
            Arc::new(Bollinger::new(period, multiplier))
        }
        "macd" => {
            let fast = param_usize(config, "fast", 12)?;
            let slow = param_usize(config, "slow", 26)?;
            let signal = param_usize(config, "signal", 9)?;
            if fast >= slow {
                return Err(ConfigError::Invalid(format!(
                    "macd on {}: fast ({fast}) must be below slow ({slow})",
                    config.symbol
                )));
            }
            Arc::new(Macd::new(fast, slow, signal))
        }
        other => return Err(ConfigError::UnknownCalculator(other.to_string())),
    };
    Ok(calculator)
}
