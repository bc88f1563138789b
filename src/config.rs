// Location: src/config.rs

use std::path::{Path, PathBuf};
use candle_core::DType;
use serde::{Serialize, Deserialize};

use crate::error::{ClassifierError, Result};

/// Hard ceiling on sequence length shared by every registered model
pub const MAX_SEQ_LEN: usize = 512;

/// Where the model weights come from and how the classifier is shaped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Registered model name (e.g. "bert-base-cased")
    pub model_name: String,

    /// Number of output classes
    pub num_labels: usize,

    /// Directory used for downloaded weights and for `fine_tuned/` output
    pub cache_dir: PathBuf,

    /// Directory holding previously fine-tuned weights, if reloading
    pub load_model_from_dir: Option<PathBuf>,
}

/// Numeric precision used while training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    BF16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::BF16 => DType::BF16,
        }
    }

    /// Whether training runs in half precision with loss scaling
    pub fn is_mixed(self) -> bool {
        self != Precision::F32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneConfig {
    /// Passes over the training set; ignored when `max_steps` is set
    pub num_epochs: usize,

    /// Hard cap on optimizer steps
    pub max_steps: Option<usize>,

    /// Examples per device per micro-batch
    pub batch_size: usize,

    /// Peak learning rate reached after warmup
    pub learning_rate: f64,

    /// AdamW epsilon
    pub adam_epsilon: f64,

    /// Linear warmup length in optimizer steps
    pub warmup_steps: usize,

    /// Decoupled weight decay for the decayed parameter group
    pub weight_decay: f64,

    /// Global gradient norm ceiling applied before every optimizer step
    pub max_grad_norm: f64,

    /// Micro-batches folded into one optimizer step
    pub gradient_accumulation_steps: usize,

    /// GPUs to use; `None` means every detected device
    pub num_gpus: Option<usize>,

    /// Rank of this process under distributed execution
    pub local_rank: Option<usize>,

    /// Number of distributed processes
    pub world_size: usize,

    pub seed: Option<u64>,

    pub precision: Precision,

    /// Log training loss every few micro-batches
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    /// Examples per device per batch
    pub batch_size: usize,

    /// GPUs to use; `None` means every detected device
    pub num_gpus: Option<usize>,

    pub verbose: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            model_name: "bert-base-cased".to_string(),
            num_labels: 2,
            cache_dir: PathBuf::from("."),
            load_model_from_dir: None,
        }
    }
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            num_epochs: 1,
            max_steps: None,
            batch_size: 32,
            learning_rate: 5e-5,
            adam_epsilon: 1e-8,
            warmup_steps: 0,
            weight_decay: 0.0,
            max_grad_norm: 1.0,
            gradient_accumulation_steps: 1,
            num_gpus: None,
            local_rank: None,
            world_size: 1,
            seed: None,
            precision: Precision::F32,
            verbose: true,
        }
    }
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            num_gpus: Some(1),
            verbose: true,
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_labels == 0 {
            return Err(ClassifierError::invalid_argument(
                "num_labels",
                "At least one label is required",
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ClassifierError::invalid_argument(
                "cache_dir",
                "Cache directory cannot be empty",
            ));
        }
        Ok(())
    }
}

impl FineTuneConfig {
    /// Read a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ClassifierError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps.is_none() && self.num_epochs == 0 {
            return Err(ClassifierError::invalid_argument(
                "num_epochs",
                "Either num_epochs must be positive or max_steps must be set",
            ));
        }
        if self.max_steps == Some(0) {
            return Err(ClassifierError::invalid_argument(
                "max_steps",
                "max_steps must be positive when set",
            ));
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::invalid_argument(
                "batch_size",
                "Batch size must be positive",
            ));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(ClassifierError::invalid_argument(
                "gradient_accumulation_steps",
                "Accumulation steps must be positive",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ClassifierError::invalid_argument(
                "learning_rate",
                format!("Learning rate {} must be positive and finite", self.learning_rate),
            ));
        }
        if !(self.adam_epsilon > 0.0) {
            return Err(ClassifierError::invalid_argument(
                "adam_epsilon",
                format!("Epsilon {} must be positive", self.adam_epsilon),
            ));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(ClassifierError::invalid_argument(
                "weight_decay",
                format!("Weight decay {} cannot be negative", self.weight_decay),
            ));
        }
        if !(self.max_grad_norm > 0.0) {
            return Err(ClassifierError::invalid_argument(
                "max_grad_norm",
                format!("Gradient clip norm {} must be positive", self.max_grad_norm),
            ));
        }
        if self.world_size == 0 {
            return Err(ClassifierError::invalid_argument(
                "world_size",
                "World size must be at least 1",
            ));
        }
        if let Some(rank) = self.local_rank {
            if rank >= self.world_size {
                return Err(ClassifierError::invalid_argument(
                    "local_rank",
                    format!("Rank {} is outside world size {}", rank, self.world_size),
                ));
            }
        }
        Ok(())
    }
}

impl PredictConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClassifierError::invalid_argument(
                "batch_size",
                "Batch size must be positive",
            ));
        }
        Ok(())
    }
}
