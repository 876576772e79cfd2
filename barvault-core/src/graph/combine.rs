//! Row combiners for generated instruments.
//!
//! A combiner sees one row per input, all at the same timestamp, in the
//! instrument's input order. Standard combiners work field-wise over
//! open/high/low/close and take volume from the first input. Returning `None`
//! drops the timestamp from the generated series.

use crate::domain::{Fields, Row, PRICE_FIELDS, VOLUME};

/// One aligned input row with its configured weight.
#[derive(Debug, Clone, Copy)]
pub struct InputRow<'a> {
    pub symbol: &'a str,
    pub weight: f64,
    pub row: &'a Row,
}

/// Pure function from aligned input rows to output fields.
pub trait Combiner: Send + Sync {
    fn name(&self) -> &str;

    fn combine(&self, inputs: &[InputRow<'_>]) -> Option<Fields>;
}

/// Apply `f` to each price field present on every input, then copy the first
/// input's volume. `f` returning `None` drops the whole row.
pub fn combine_prices(
    inputs: &[InputRow<'_>],
    f: impl Fn(&[(f64, f64)]) -> Option<f64>,
) -> Option<Fields> {
    let mut fields = Fields::new();
    let mut weighted = Vec::with_capacity(inputs.len());

    for name in PRICE_FIELDS {
        weighted.clear();
        for input in inputs {
            match input.row.get(name) {
                Some(v) => weighted.push((input.weight, v)),
                None => break,
            }
        }
        if weighted.len() != inputs.len() {
            continue;
        }
        fields.insert(name.to_string(), f(&weighted)?);
    }

    if fields.is_empty() {
        return None;
    }
    if let Some(volume) = inputs.first().and_then(|i| i.row.get(VOLUME)) {
        fields.insert(VOLUME.to_string(), volume);
    }
    Some(fields)
}

/// `w0·x0 − Σ wi·xi` over the remaining inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spread;

impl Combiner for Spread {
    fn name(&self) -> &str {
        "spread"
    }

    fn combine(&self, inputs: &[InputRow<'_>]) -> Option<Fields> {
        combine_prices(inputs, |vals| {
            let (first, rest) = vals.split_first()?;
            Some(first.0 * first.1 - rest.iter().map(|(w, x)| w * x).sum::<f64>())
        })
    }
}

/// `x0 / x1`. Weights are ignored; a zero denominator drops the row.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ratio;

impl Combiner for Ratio {
    fn name(&self) -> &str {
        "ratio"
    }

    fn combine(&self, inputs: &[InputRow<'_>]) -> Option<Fields> {
        combine_prices(inputs, |vals| match vals {
            [(_, _), (_, d)] if *d == 0.0 => None,
            [(_, n), (_, d)] => Some(n / d),
            _ => None,
        })
    }
}

/// `Σ wi·xi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Weighted;

impl Combiner for Weighted {
    fn name(&self) -> &str {
        "weighted"
    }

    fn combine(&self, inputs: &[InputRow<'_>]) -> Option<Fields> {
        combine_prices(inputs, |vals| Some(vals.iter().map(|(w, x)| w * x).sum()))
    }
}
