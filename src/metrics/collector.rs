use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::types::{EpochMetrics, StepMetrics, TrainingReport};
use super::MAX_METRICS_HISTORY;

/// Collects loss and learning-rate history while a model trains
pub struct TrainingMetricsCollector {
    start_time: Instant,
    epoch_start: Instant,
    history: VecDeque<StepMetrics>,
    epochs: Vec<EpochMetrics>,

    // Loss of micro-batches not yet closed by an optimizer step
    window_loss: f64,
    total_loss: f64,
    global_step: usize,
    skipped_steps: usize,

    epoch_loss: f64,
    epoch_steps: usize,
}

impl TrainingMetricsCollector {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            epoch_start: now,
            history: VecDeque::with_capacity(MAX_METRICS_HISTORY),
            epochs: Vec::new(),
            window_loss: 0.0,
            total_loss: 0.0,
            global_step: 0,
            skipped_steps: 0,
            epoch_loss: 0.0,
            epoch_steps: 0,
        }
    }

    /// Record the (accumulation-scaled) loss of one micro-batch
    pub fn record_micro_batch(&mut self, loss: f64) {
        self.window_loss += loss;
        self.total_loss += loss;
        self.epoch_loss += loss;
    }

    /// Close the current accumulation window as an optimizer step
    pub fn record_step(&mut self, learning_rate: f64, grad_norm: Option<f64>, skipped: bool) {
        self.global_step += 1;
        self.epoch_steps += 1;
        if skipped {
            self.skipped_steps += 1;
        }

        if self.history.len() == MAX_METRICS_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(StepMetrics {
            step: self.global_step,
            loss: self.window_loss,
            learning_rate,
            grad_norm,
            skipped,
        });
        self.window_loss = 0.0;
    }

    pub fn start_epoch(&mut self) {
        self.epoch_start = Instant::now();
        self.epoch_loss = 0.0;
        self.epoch_steps = 0;
    }

    pub fn end_epoch(&mut self, epoch: usize) -> &EpochMetrics {
        let average_loss = if self.epoch_steps > 0 {
            self.epoch_loss / self.epoch_steps as f64
        } else {
            0.0
        };
        self.epochs.push(EpochMetrics {
            epoch,
            steps: self.epoch_steps,
            average_loss,
            duration: self.epoch_start.elapsed(),
        });
        &self.epochs[self.epochs.len() - 1]
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn average_loss(&self) -> f64 {
        if self.global_step == 0 {
            0.0
        } else {
            self.total_loss / self.global_step as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self, effective_batch_size: usize) -> TrainingReport {
        TrainingReport {
            global_step: self.global_step,
            average_loss: self.average_loss(),
            elapsed: self.elapsed(),
            epochs: self.epochs,
            recent_steps: self.history.into_iter().collect(),
            skipped_steps: self.skipped_steps,
            effective_batch_size,
        }
    }
}

impl Default for TrainingMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_average_over_steps() {
        let mut collector = TrainingMetricsCollector::new();
        collector.start_epoch();
        collector.record_micro_batch(0.5);
        collector.record_micro_batch(0.25);
        collector.record_step(1e-3, Some(2.0), false);
        collector.record_micro_batch(0.25);
        collector.record_step(5e-4, None, true);
        let epoch = collector.end_epoch(0).clone();

        assert_eq!(epoch.steps, 2);
        assert_eq!(epoch.average_loss, 0.5);

        let report = collector.finish(8);
        assert_eq!(report.summary(), (2, 0.5));
        assert_eq!(report.skipped_steps, 1);
        assert_eq!(report.recent_steps[0].loss, 0.75);
        assert_eq!(report.recent_steps[1].step, 2);
        assert_eq!(report.effective_batch_size, 8);
    }

    #[test]
    fn test_no_steps_reports_zero_loss() {
        let mut collector = TrainingMetricsCollector::new();
        collector.record_micro_batch(1.0);
        assert_eq!(collector.average_loss(), 0.0);
        assert_eq!(collector.finish(1).global_step, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut collector = TrainingMetricsCollector::new();
        for _ in 0..MAX_METRICS_HISTORY + 5 {
            collector.record_micro_batch(0.1);
            collector.record_step(1e-3, None, false);
        }
        let report = collector.finish(1);
        assert_eq!(report.recent_steps.len(), MAX_METRICS_HISTORY);
        assert_eq!(report.recent_steps[0].step, 6);
    }
}
