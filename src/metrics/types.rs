use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Metrics recorded for a single optimizer step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    /// 1-based optimizer step
    pub step: usize,

    /// Loss accumulated over the step's micro-batches
    pub loss: f64,

    /// Learning rate the step was taken with
    pub learning_rate: f64,

    /// Gradient norm before clipping
    pub grad_norm: Option<f64>,

    /// Whether the update was dropped after a half-precision overflow
    pub skipped: bool,
}

/// Summary of one pass over the training data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,

    /// Optimizer steps completed during the epoch
    pub steps: usize,

    /// Mean step loss over the epoch
    pub average_loss: f64,

    pub duration: Duration,
}

/// Result of a fine-tuning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Optimizer steps completed
    pub global_step: usize,

    /// Mean loss over completed optimizer steps (0 when none completed)
    pub average_loss: f64,

    pub epochs: Vec<EpochMetrics>,

    /// Most recent steps, oldest first
    pub recent_steps: Vec<StepMetrics>,

    /// Steps whose update was skipped by the loss scaler
    pub skipped_steps: usize,

    /// Examples per micro-batch after scaling by the GPU count
    pub effective_batch_size: usize,

    pub elapsed: Duration,
}

impl TrainingReport {
    /// `(steps completed, average loss)`
    pub fn summary(&self) -> (usize, f64) {
        (self.global_step, self.average_loss)
    }
}
