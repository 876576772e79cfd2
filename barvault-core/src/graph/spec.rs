//! Instrument specifications.

use super::combine::{Combiner, Ratio, Spread, Weighted};
use crate::domain::Interval;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Spread,
    Ratio,
    Weighted,
    Custom,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentKind::Spread => "spread",
            InstrumentKind::Ratio => "ratio",
            InstrumentKind::Weighted => "weighted",
            InstrumentKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

fn default_weight() -> f64 {
    1.0
}

/// One input leg: a symbol, its weight, and optionally the interval it must
/// be combined at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInput {
    pub symbol: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub interval: Option<Interval>,
}

impl InstrumentInput {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            weight: 1.0,
            interval: None,
        }
    }

    pub fn weighted(symbol: impl Into<String>, weight: f64) -> Self {
        Self {
            weight,
            ..Self::new(symbol)
        }
    }

    pub fn pinned(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// A generated instrument: a named, pure combination of other symbols.
#[derive(Clone)]
pub struct InstrumentSpec {
    pub name: String,
    pub kind: InstrumentKind,
    pub inputs: Vec<InstrumentInput>,
    combine: Arc<dyn Combiner>,
}

impl fmt::Debug for InstrumentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("combine", &self.combine.name())
            .finish()
    }
}

impl InstrumentSpec {
    pub fn spread(name: impl Into<String>, inputs: Vec<InstrumentInput>) -> Self {
        Self::with_combiner(name, InstrumentKind::Spread, inputs, Arc::new(Spread))
    }

    pub fn ratio(
        name: impl Into<String>,
        numerator: InstrumentInput,
        denominator: InstrumentInput,
    ) -> Self {
        Self::with_combiner(
            name,
            InstrumentKind::Ratio,
            vec![numerator, denominator],
            Arc::new(Ratio),
        )
    }

    pub fn weighted(name: impl Into<String>, inputs: Vec<InstrumentInput>) -> Self {
        Self::with_combiner(name, InstrumentKind::Weighted, inputs, Arc::new(Weighted))
    }

    pub fn custom(
        name: impl Into<String>,
        inputs: Vec<InstrumentInput>,
        combine: Arc<dyn Combiner>,
    ) -> Self {
        Self::with_combiner(name, InstrumentKind::Custom, inputs, combine)
    }

    fn with_combiner(
        name: impl Into<String>,
        kind: InstrumentKind,
        inputs: Vec<InstrumentInput>,
        combine: Arc<dyn Combiner>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            combine,
        }
    }

    pub fn combiner(&self) -> &dyn Combiner {
        self.combine.as_ref()
    }

    /// The single interval the inputs pin, if any.
    pub fn pinned_interval(&self) -> Result<Option<Interval>> {
        let mut pinned: Option<Interval> = None;
        for input in &self.inputs {
            match (pinned, input.interval) {
                (Some(expected), Some(found)) if expected != found => {
                    return Err(EngineError::IntervalMismatch {
                        name: self.name.clone(),
                        expected,
                        found,
                    })
                }
                (None, Some(found)) => pinned = Some(found),
                _ => {}
            }
        }
        Ok(pinned)
    }

    /// Structural checks that do not depend on the rest of the graph.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| EngineError::InvalidInstrument {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.inputs.is_empty() {
            return Err(invalid("no inputs"));
        }
        if self.kind == InstrumentKind::Ratio && self.inputs.len() != 2 {
            return Err(invalid("ratio needs exactly two inputs"));
        }
        if self.inputs.iter().any(|i| !i.weight.is_finite()) {
            return Err(invalid("weights must be finite"));
        }
        self.pinned_interval()?;
        Ok(())
    }
}
