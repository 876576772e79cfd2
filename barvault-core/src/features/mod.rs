//! Feature pipeline: calculators bound to symbols, applied after every sync.

pub mod factory;
pub mod pipeline;

pub use factory::{create_calculator, FeatureConfig};
pub use pipeline::{FeaturePipeline, FeatureSpec, LookbackPolicy};
