//! Half-precision training support: availability checks, f32 master weights
//! and dynamic loss scaling

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Result, Shape, Tensor, Var};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, VarMap};
use tracing::debug;

use super::gradients::{has_non_finite, scale_grads};
use crate::config::Precision;
use crate::error::ClassifierError;

/// Fail unless half-precision training can run on `device`
pub fn ensure_mixed_precision(precision: Precision, device: &Device) -> crate::Result<()> {
    if !precision.is_mixed() {
        return Ok(());
    }
    if !cfg!(feature = "cuda") {
        return Err(ClassifierError::MissingFeature {
            feature: "cuda".to_string(),
            message: format!(
                "{:?} training needs CUDA kernels; rebuild with `cargo build --features cuda`",
                precision
            ),
        });
    }
    if !device.is_cuda() {
        return Err(ClassifierError::DeviceError {
            message: format!("{:?} training requires a CUDA device", precision),
        });
    }
    Ok(())
}

/// Parameter source for half-precision models backed by f32 master weights.
///
/// Every lookup returns a cast of the master variable that stays on the
/// autograd graph, so backward yields f32 gradients for the master
/// parameters and the optimizer never touches half-precision state.
pub struct MasterWeights {
    varmap: VarMap,
}

impl MasterWeights {
    pub fn new(varmap: VarMap) -> Self {
        Self { varmap }
    }
}

impl SimpleBackend for MasterWeights {
    fn get(&self, s: Shape, name: &str, h: Init, dtype: DType, dev: &Device) -> Result<Tensor> {
        self.varmap.get(s, name, h, DType::F32, dev)?.to_dtype(dtype)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.varmap
            .data()
            .lock()
            .map(|data| data.contains_key(name))
            .unwrap_or(false)
    }
}

/// Dynamic loss scaler keeping small half-precision gradients representable.
///
/// The loss is multiplied by `scale` before backward and gradients divided by
/// it afterwards. An overflow skips the step and halves the scale; a run of
/// `growth_interval` clean steps doubles it.
#[derive(Debug, Clone)]
pub struct LossScaler {
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    good_steps: usize,
}

impl Default for LossScaler {
    fn default() -> Self {
        Self {
            scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            good_steps: 0,
        }
    }
}

impl LossScaler {
    pub fn new(initial_scale: f64, growth_interval: usize) -> Self {
        Self {
            scale: initial_scale,
            growth_interval,
            ..Default::default()
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scale_loss(&self, loss: &Tensor) -> Result<Tensor> {
        loss.affine(self.scale, 0.0)
    }

    /// Divide gradients by the current scale and update it.
    ///
    /// Returns `false` when the gradients overflowed and the optimizer step
    /// must be skipped.
    pub fn unscale_and_update(&mut self, grads: &mut GradStore, vars: &[Var]) -> Result<bool> {
        if has_non_finite(grads, vars)? {
            self.scale = (self.scale * self.backoff_factor).max(1.0);
            self.good_steps = 0;
            debug!(scale = self.scale, "Gradient overflow, skipping step");
            return Ok(false);
        }

        scale_grads(grads, vars, 1.0 / self.scale)?;
        self.good_steps += 1;
        if self.good_steps >= self.growth_interval {
            self.scale *= self.growth_factor;
            self.good_steps = 0;
        }
        Ok(true)
    }
}
