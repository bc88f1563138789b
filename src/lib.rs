//! NLP Transformers - fine-tuning and batched inference for pretrained
//! transformer sequence classifiers
//!
//! This crate is a thin layer over candle: it picks a model and tokenizer by
//! registered name, turns text into padded id/mask sequences, fine-tunes the
//! classifier with grouped AdamW, a warmup-linear schedule, gradient clipping
//! and accumulation, predicts in batches, and persists the result under
//! `<cache_dir>/fine_tuned/`.

use std::fmt;

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod model;
pub mod processing;
pub mod training;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_RUST_VERSION: &str = "1.74.0";

// Re-exports for public API
pub use config::{FineTuneConfig, LoadConfig, PredictConfig, Precision, MAX_SEQ_LEN};
pub use engine::{ClassifierBuilder, SequenceClassifier, Transformer};
pub use error::{ClassifierError, Result};
pub use metrics::TrainingReport;
pub use model::list_supported_models;
pub use processing::Processor;
pub use types::{TextDataset, TokenizedExample};

/// Feature detection for supported backends
pub struct Features {
    /// Whether this build carries CUDA kernels
    pub cuda: bool,
    /// Number of detected CUDA devices
    pub cuda_devices: usize,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        Self {
            cuda: cfg!(feature = "cuda"),
            cuda_devices: gpu::cuda_device_count(),
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })?;
        if self.cuda {
            writeln!(f, "CUDA devices: {}", self.cuda_devices)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_detection() {
        let features = Features::detect();
        if !features.cuda {
            assert_eq!(features.cuda_devices, 0);
        }
        assert!(features.to_string().starts_with("CUDA support"));
    }

    #[test]
    fn test_version_numbers() {
        assert!(!VERSION.is_empty());
        assert!(!MIN_RUST_VERSION.is_empty());
    }
}
