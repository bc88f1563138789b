use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};

/// Running sum of parameter gradients across the micro-batches of one
/// accumulation window.
///
/// Only parameter gradients are kept, so each micro-batch's graph can be
/// dropped as soon as it has been folded in.
pub struct GradientAccumulator {
    vars: Vec<Var>,
    sums: Vec<Option<Tensor>>,
    micro_batches: usize,
}

impl GradientAccumulator {
    pub fn new(vars: Vec<Var>) -> Self {
        let sums = vec![None; vars.len()];
        Self {
            vars,
            sums,
            micro_batches: 0,
        }
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Micro-batches folded in since the last `merge_into`
    pub fn pending(&self) -> usize {
        self.micro_batches
    }

    pub fn add(&mut self, grads: &GradStore) -> Result<()> {
        for (var, sum) in self.vars.iter().zip(self.sums.iter_mut()) {
            if let Some(grad) = grads.get(var) {
                *sum = Some(match sum.take() {
                    Some(total) => (total + grad)?,
                    None => grad.clone(),
                });
            }
        }
        self.micro_batches += 1;
        Ok(())
    }

    /// Add the stored sums into `grads` (the last micro-batch's gradients)
    /// and reset the window
    pub fn merge_into(&mut self, grads: &mut GradStore) -> Result<()> {
        for (var, sum) in self.vars.iter().zip(self.sums.iter_mut()) {
            if let Some(total) = sum.take() {
                let merged = match grads.get(var) {
                    Some(grad) => (grad + total)?,
                    None => total,
                };
                grads.insert(var, merged);
            }
        }
        self.micro_batches = 0;
        Ok(())
    }
}

/// Global L2 norm over every parameter gradient, computed in f32
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let sq = grad.to_dtype(DType::F32)?.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total += sq as f64;
        }
    }
    Ok(total.sqrt())
}

/// Rescale gradients so their global norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let norm = grad_norm(grads, vars)?;
    let coef = max_norm / (norm + 1e-6);
    if coef < 1.0 {
        scale_grads(grads, vars, coef)?;
    }
    Ok(norm)
}

/// Multiply every parameter gradient by `factor`
pub fn scale_grads(grads: &mut GradStore, vars: &[Var], factor: f64) -> Result<()> {
    for var in vars {
        if let Some(grad) = grads.remove(var) {
            grads.insert(var, grad.affine(factor, 0.0)?);
        }
    }
    Ok(())
}

/// Whether any gradient holds an inf or NaN
pub fn has_non_finite(grads: &GradStore, vars: &[Var]) -> Result<bool> {
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let sum = grad.to_dtype(DType::F32)?.abs()?.sum_all()?.to_scalar::<f32>()?;
            if !sum.is_finite() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
