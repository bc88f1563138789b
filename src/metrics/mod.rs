//! Training metrics collection

mod collector;
mod types;

pub use collector::TrainingMetricsCollector;
pub use types::{EpochMetrics, StepMetrics, TrainingReport};

// Steps kept in a report's recent history
pub(crate) const MAX_METRICS_HISTORY: usize = 1000;
