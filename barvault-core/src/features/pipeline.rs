//! Per-symbol feature registry and the augmentation pass.

use crate::domain::{Row, TimeWindow, BASE_FIELDS};
use crate::error::{EngineError, Result};
use crate::indicators::FeatureCalculator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A calculator bound to a symbol.
#[derive(Clone)]
pub struct FeatureSpec {
    pub symbol: String,
    pub calculator: Arc<dyn FeatureCalculator>,
}

impl FeatureSpec {
    pub fn new(symbol: impl Into<String>, calculator: Arc<dyn FeatureCalculator>) -> Self {
        Self {
            symbol: symbol.into(),
            calculator,
        }
    }
}

impl fmt::Debug for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSpec")
            .field("symbol", &self.symbol)
            .field("calculator", &self.calculator.name())
            .field("outputs", &self.calculator.outputs())
            .finish()
    }
}

/// What to do when fewer rows than a calculator's lookback precede the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookbackPolicy {
    /// Compute with whatever history exists.
    #[default]
    Truncate,
    /// Fail the symbol's augmentation.
    Strict,
}

#[derive(Debug, Default, Clone)]
pub struct FeaturePipeline {
    specs: HashMap<String, Vec<FeatureSpec>>,
}

impl FeaturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec after every earlier one for the same symbol.
    ///
    /// Output names must be new for the symbol and must not shadow a base field.
    pub fn register(&mut self, spec: FeatureSpec) -> Result<()> {
        let mut taken: BTreeSet<String> = BASE_FIELDS.iter().map(|f| f.to_string()).collect();
        taken.extend(self.features_for(&spec.symbol));

        for output in spec.calculator.outputs() {
            if !taken.insert(output.clone()) {
                return Err(EngineError::DuplicateFeatureField {
                    symbol: spec.symbol,
                    field: output,
                });
            }
        }

        debug!(symbol = %spec.symbol, calculator = spec.calculator.name(), "feature registered");
        self.specs.entry(spec.symbol.clone()).or_default().push(spec);
        Ok(())
    }

    pub fn has_features(&self, symbol: &str) -> bool {
        self.specs.get(symbol).is_some_and(|s| !s.is_empty())
    }

    /// Longest lookback among the symbol's calculators.
    pub fn max_lookback(&self, symbol: &str) -> usize {
        self.specs
            .get(symbol)
            .into_iter()
            .flatten()
            .map(|s| s.calculator.lookback())
            .max()
            .unwrap_or(0)
    }

    /// Output names for one symbol, in registration order.
    pub fn features_for(&self, symbol: &str) -> Vec<String> {
        self.specs
            .get(symbol)
            .into_iter()
            .flatten()
            .flat_map(|s| s.calculator.outputs())
            .collect()
    }

    /// Every output name across all symbols, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .specs
            .values()
            .flatten()
            .flat_map(|s| s.calculator.outputs())
            .collect();
        names.into_iter().collect()
    }

    /// Run every calculator for `symbol` over `rows` and merge the outputs.
    ///
    /// All or nothing: the first failure returns an error and no row is
    /// touched. Undefined values (NaN) are left out of the row.
    pub fn apply(&self, symbol: &str, rows: &[Row]) -> Result<Vec<Row>> {
        let Some(specs) = self.specs.get(symbol) else {
            return Ok(rows.to_vec());
        };

        let mut columns = Vec::new();
        for spec in specs {
            let calculator = spec.calculator.as_ref();
            let fail = |reason: String| EngineError::FeatureComputeError {
                calculator: calculator.name().to_string(),
                symbol: symbol.to_string(),
                reason,
            };

            let outputs = calculator.outputs();
            for column in calculator.compute(rows).map_err(fail)? {
                if column.values.len() != rows.len() {
                    return Err(fail(format!(
                        "{} produced {} values for {} rows",
                        column.name,
                        column.values.len(),
                        rows.len()
                    )));
                }
                if !outputs.contains(&column.name) {
                    return Err(fail(format!("undeclared output '{}'", column.name)));
                }
                columns.push(column);
            }
        }

        let mut out = rows.to_vec();
        for column in columns {
            for (row, value) in out.iter_mut().zip(column.values) {
                if value.is_finite() {
                    row.fields.insert(column.name.clone(), value);
                }
            }
        }
        Ok(out)
    }

    /// `apply` over history plus window, then trim to the window.
    pub fn apply_window(
        &self,
        symbol: &str,
        rows: &[Row],
        window: TimeWindow,
        policy: LookbackPolicy,
    ) -> Result<Vec<Row>> {
        if policy == LookbackPolicy::Strict {
            let history = rows.iter().filter(|r| r.timestamp < window.start).count();
            for spec in self.specs.get(symbol).into_iter().flatten() {
                let needed = spec.calculator.lookback();
                if history < needed {
                    return Err(EngineError::FeatureComputeError {
                        calculator: spec.calculator.name().to_string(),
                        symbol: symbol.to_string(),
                        reason: format!(
                            "{history} rows before {} but lookback needs {needed}",
                            window.start
                        ),
                    });
                }
            }
        }

        let mut out = self.apply(symbol, rows)?;
        out.retain(|r| window.contains(r.timestamp));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{make_rows, FeatureColumn, Sma};

    struct Broken;

    impl FeatureCalculator for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn outputs(&self) -> Vec<String> {
            vec!["broken".into()]
        }
        fn lookback(&self) -> usize {
            0
        }
        fn compute(&self, _rows: &[Row]) -> std::result::Result<Vec<FeatureColumn>, String> {
            Err("no".into())
        }
    }

    struct Named(&'static str);

    impl FeatureCalculator for Named {
        fn id(&self) -> &str {
            "named"
        }
        fn name(&self) -> &str {
            self.0
        }
        fn outputs(&self) -> Vec<String> {
            vec![self.0.to_string()]
        }
        fn lookback(&self) -> usize {
            0
        }
        fn compute(&self, rows: &[Row]) -> std::result::Result<Vec<FeatureColumn>, String> {
            Ok(vec![FeatureColumn::new(self.0, vec![1.0; rows.len()])])
        }
    }

    fn sma(symbol: &str, period: usize) -> FeatureSpec {
        FeatureSpec::new(symbol, Arc::new(Sma::new(period)))
    }

    #[test]
    fn sma_fields_are_absent_during_warmup() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("TEST", 3)).unwrap();

        let rows = make_rows(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = pipeline.apply("TEST", &rows).unwrap();
        let values: Vec<Option<f64>> = out.iter().map(|r| r.get("sma_3")).collect();
        assert_eq!(values, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(out[0].close(), Some(1.0));
    }

    #[test]
    fn duplicate_and_shadowing_outputs_are_rejected() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("SPY", 20)).unwrap();
        assert!(matches!(
            pipeline.register(sma("SPY", 20)),
            Err(EngineError::DuplicateFeatureField { field, .. }) if field == "sma_20"
        ));
        assert!(matches!(
            pipeline.register(FeatureSpec::new("SPY", Arc::new(Named("close")))),
            Err(EngineError::DuplicateFeatureField { .. })
        ));
        pipeline.register(sma("QQQ", 20)).unwrap();
        assert_eq!(pipeline.features_for("SPY"), vec!["sma_20"]);
        assert_eq!(pipeline.feature_names(), vec!["sma_20"]);
    }

    #[test]
    fn failure_leaves_rows_untouched() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("TEST", 2)).unwrap();
        pipeline.register(FeatureSpec::new("TEST", Arc::new(Broken))).unwrap();

        let rows = make_rows(&[1.0, 2.0, 3.0]);
        match pipeline.apply("TEST", &rows).unwrap_err() {
            EngineError::FeatureComputeError { calculator, symbol, .. } => {
                assert_eq!(calculator, "broken");
                assert_eq!(symbol, "TEST");
            }
            other => panic!("unexpected {other}"),
        }
        assert!(rows.iter().all(|r| r.get("sma_2").is_none()));
    }

    #[test]
    fn symbols_without_features_pass_through() {
        let pipeline = FeaturePipeline::new();
        let rows = make_rows(&[1.0, 2.0]);
        assert_eq!(pipeline.apply("TEST", &rows).unwrap(), rows);
        assert_eq!(pipeline.max_lookback("TEST"), 0);
    }

    #[test]
    fn window_is_trimmed_after_compute() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("TEST", 3)).unwrap();
        let rows = make_rows(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let window = TimeWindow::new(rows[2].timestamp, rows[4].timestamp);

        let out = pipeline
            .apply_window("TEST", &rows, window, LookbackPolicy::Truncate)
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get("sma_3"), Some(2.0));
    }

    #[test]
    fn strict_policy_needs_full_history() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("TEST", 3)).unwrap();
        let rows = make_rows(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let short = TimeWindow::new(rows[1].timestamp, rows[4].timestamp);
        assert!(matches!(
            pipeline.apply_window("TEST", &rows, short, LookbackPolicy::Strict),
            Err(EngineError::FeatureComputeError { .. })
        ));
        let truncated = pipeline
            .apply_window("TEST", &rows, short, LookbackPolicy::Truncate)
            .unwrap();
        assert_eq!(truncated[0].get("sma_3"), None);

        let enough = TimeWindow::new(rows[2].timestamp, rows[4].timestamp);
        assert!(pipeline
            .apply_window("TEST", &rows, enough, LookbackPolicy::Strict)
            .is_ok());
    }

    #[test]
    fn max_lookback_takes_the_longest() {
        let mut pipeline = FeaturePipeline::new();
        pipeline.register(sma("TEST", 3)).unwrap();
        pipeline.register(sma("TEST", 10)).unwrap();
        assert_eq!(pipeline.max_lookback("TEST"), 9);
    }
}
