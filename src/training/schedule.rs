//! Linear warmup / linear decay learning rate schedule

/// Learning rate ramps linearly from 0 to `base_lr` over `warmup_steps`, then
/// decays linearly to 0 at `total_steps`.
///
/// Formula: `lr_t = base_lr * t / warmup` while `t < warmup`, otherwise
/// `base_lr * max(0, (total - t) / (total - warmup))`.
#[derive(Debug, Clone)]
pub struct WarmupLinearSchedule {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
}

impl WarmupLinearSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            current_step: 0,
        }
    }

    /// Multiplier applied to the base rate at `step`
    pub fn factor(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / decay_span).max(0.0)
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        self.base_lr * self.factor(step)
    }

    /// Rate for the upcoming optimizer step
    pub fn get_lr(&self) -> f64 {
        self.lr_at(self.current_step)
    }

    pub fn step(&mut self) {
        self.current_step += 1;
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}
