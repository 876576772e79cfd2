//! Bollinger Bands.
//!
//! middle = SMA(close, period)
//! upper/lower = middle ± multiplier * population stddev(close, period)
//! width = (upper - lower) / middle
//! Lookback: period - 1.

use super::sma::sma_of_series;
use super::{closes, FeatureCalculator, FeatureColumn};
use crate::domain::Row;

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        Self {
            period,
            multiplier,
            name: format!("bollinger_{period}_{multiplier}"),
        }
    }

    fn field(&self, band: &str) -> String {
        format!("bb_{band}_{}", self.period)
    }
}

impl FeatureCalculator for Bollinger {
    fn id(&self) -> &str {
        "bollinger"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        ["middle", "upper", "lower", "width"]
            .iter()
            .map(|band| self.field(band))
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, rows: &[Row]) -> Result<Vec<FeatureColumn>, String> {
        let closes = closes(rows)?;
        let n = closes.len();
        let middle = sma_of_series(&closes, self.period);

        let mut upper = vec![f64::NAN; n];
        let mut lower = vec![f64::NAN; n];
        let mut width = vec![f64::NAN; n];

        for i in self.lookback()..n {
            let mean = middle[i];
            let window = &closes[i + 1 - self.period..=i];
            let variance =
                window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / self.period as f64;
            let band = self.multiplier * variance.sqrt();

            upper[i] = mean + band;
            lower[i] = mean - band;
            if mean != 0.0 {
                width[i] = (upper[i] - lower[i]) / mean;
            }
        }

        Ok(vec![
            FeatureColumn::new(self.field("middle"), middle),
            FeatureColumn::new(self.field("upper"), upper),
            FeatureColumn::new(self.field("lower"), lower),
            FeatureColumn::new(self.field("width"), width),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_rows, DEFAULT_EPSILON};

    #[test]
    fn bands_use_population_stddev() {
        // Window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population stddev 2
        let rows = make_rows(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let columns = Bollinger::new(8, 2.0).compute(&rows).unwrap();

        assert_eq!(columns[0].name, "bb_middle_8");
        assert_approx(columns[0].values[7], 5.0, DEFAULT_EPSILON);
        assert_approx(columns[1].values[7], 9.0, DEFAULT_EPSILON);
        assert_approx(columns[2].values[7], 1.0, DEFAULT_EPSILON);
        assert_approx(columns[3].values[7], 8.0 / 5.0, DEFAULT_EPSILON);
        assert!(columns.iter().all(|c| c.values[6].is_nan()));
    }

    #[test]
    fn flat_series_collapses_bands() {
        let columns = Bollinger::new(3, 2.0).compute(&make_rows(&[10.0; 5])).unwrap();
        assert_approx(columns[1].values[4], 10.0, DEFAULT_EPSILON);
        assert_approx(columns[2].values[4], 10.0, DEFAULT_EPSILON);
        assert_approx(columns[3].values[4], 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn outputs_are_suffixed_by_period() {
        assert_eq!(
            Bollinger::new(20, 2.0).outputs(),
            vec!["bb_middle_20", "bb_upper_20", "bb_lower_20", "bb_width_20"]
        );
    }
}
