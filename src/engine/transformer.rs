use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde_json::json;
use tracing::{debug, info, warn};

use super::inference::Predictions;
use crate::config::{FineTuneConfig, LoadConfig, PredictConfig};
use crate::error::{ClassifierError, Result};
use crate::gpu::{select_device, GradientSync};
use crate::metrics::TrainingReport;
use crate::model::{
    self, ModelEntry, ModelFamily, ModelLoader, SequenceClassification, CONFIG_FILE, WEIGHTS_FILE,
};
use crate::processing::{DataLoader, ModelInputs, Sampler};
use crate::training::{MasterWeights, Trainer};
use crate::types::TextDataset;

/// Directory under the cache dir that `save_model` writes to
pub const FINE_TUNED_DIR: &str = "fine_tuned";

/// A registered pretrained model with a classification head, together with
/// the parameter store it reads its weights from.
///
/// Parameters live in a [`VarMap`]; the optimizer step is their only writer.
pub struct Transformer {
    model_name: String,
    model_type: String,
    num_labels: usize,
    cache_dir: PathBuf,
    load_model_from_dir: Option<PathBuf>,
    config: serde_json::Value,
    constructor: model::ModelConstructor,
    varmap: VarMap,
    model: Box<dyn SequenceClassification>,
    device: Device,
    dtype: DType,
    gradient_sync: Option<Arc<dyn GradientSync>>,
}

impl Transformer {
    /// Build a randomly initialized classifier from a raw `config.json`
    pub fn from_config(
        model_name: &str,
        mut config: serde_json::Value,
        num_labels: usize,
        cache_dir: impl Into<PathBuf>,
        device: Device,
    ) -> Result<Self> {
        let entry = model::lookup(model_name)?;
        let constructor = model::model_constructor(model_name)?;
        if num_labels == 0 {
            return Err(ClassifierError::invalid_argument(
                "num_labels",
                "At least one label is required",
            ));
        }
        check_family(&entry, &config)?;

        match config.as_object_mut() {
            Some(fields) => {
                fields.insert("num_labels".to_string(), json!(num_labels));
            }
            None => return Err(ClassifierError::model("config.json must hold a JSON object")),
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = constructor(vb, &config, num_labels)?;

        Ok(Self {
            model_name: model_name.to_string(),
            model_type: entry.family.model_type().to_string(),
            num_labels,
            cache_dir: cache_dir.into(),
            load_model_from_dir: None,
            config,
            constructor,
            varmap,
            model,
            device,
            dtype: DType::F32,
            gradient_sync: None,
        })
    }

    /// Load a registered model, either from the hub (cached under
    /// `cache_dir`) or from a directory written by [`Transformer::save_model`].
    pub async fn from_pretrained(load: &LoadConfig, device: Device) -> Result<Self> {
        load.validate()?;
        let entry = model::lookup(&load.model_name)?;

        let files = match &load.load_model_from_dir {
            Some(dir) => {
                info!(dir = %dir.display(), model = %load.model_name, "Loading fine-tuned model");
                ModelLoader::local_files(dir)?
            }
            None => {
                info!(repo = entry.hub_repo, model = %load.model_name, "Loading pretrained model");
                ModelLoader::new(&load.cache_dir).fetch_pretrained(&entry).await?
            }
        };

        let config = ModelLoader::read_config(&files.config)?;
        if let Some(saved) = config.get("num_labels").and_then(|v| v.as_u64()) {
            if load.load_model_from_dir.is_some() && saved as usize != load.num_labels {
                warn!(
                    saved,
                    requested = load.num_labels,
                    "Label count differs from the saved model; the classifier head is reinitialized"
                );
            }
        }

        let mut transformer = Self::from_config(
            &load.model_name,
            config,
            load.num_labels,
            &load.cache_dir,
            device,
        )?;
        transformer.load_model_from_dir = load.load_model_from_dir.clone();
        ModelLoader::load_weights(&transformer.varmap, &files.weights, &transformer.device)?;
        Ok(transformer)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Point the handle at another registered name; the model type follows
    /// the new name's prefix
    pub fn set_model_name(&mut self, model_name: &str) -> Result<()> {
        let entry = model::lookup(model_name)?;
        if entry.family != self.family() {
            return Err(ClassifierError::invalid_argument(
                "model_name",
                format!(
                    "{} is a {} model but the loaded weights are {}",
                    model_name,
                    entry.family,
                    self.family()
                ),
            ));
        }
        self.model_name = model_name.to_string();
        self.model_type = entry.family.model_type().to_string();
        Ok(())
    }

    /// Architecture prefix of the model name ("bert", "distilbert")
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn load_model_from_dir(&self) -> Option<&Path> {
        self.load_model_from_dir.as_deref()
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Current value of a named parameter
    pub fn parameter(&self, name: &str) -> Option<Tensor> {
        let data = self.varmap.data().lock().ok()?;
        data.get(name).map(|var| var.as_tensor().clone())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Register the gradient exchange used by distributed fine-tuning
    pub fn with_gradient_sync(mut self, sync: Arc<dyn GradientSync>) -> Self {
        self.gradient_sync = Some(sync);
        self
    }

    pub fn gradient_sync(&self) -> Option<Arc<dyn GradientSync>> {
        self.gradient_sync.clone()
    }

    /// `(batch, num_labels)` logits for prepared model inputs
    pub fn forward(&self, inputs: &ModelInputs, train: bool) -> Result<Tensor> {
        Ok(self
            .model
            .forward_t(&inputs.input_ids, &inputs.attention_mask, train)?)
    }

    /// A model over the same parameters computing in `dtype`.
    ///
    /// Weights are cast when the model is built and gradients flow back to
    /// the f32 parameters, so it has to be rebuilt after every update.
    pub(crate) fn cast_model(&self, dtype: DType) -> Result<Box<dyn SequenceClassification>> {
        let backend = MasterWeights::new(self.varmap.clone());
        let vb = VarBuilder::from_backend(Box::new(backend), dtype, self.device.clone());
        Ok((self.constructor)(vb, &self.config, self.num_labels)?)
    }

    /// Move the parameters to `device` and cast them to `dtype`.
    ///
    /// The model is rebuilt around a fresh parameter store, so optimizer
    /// state tied to the old variables does not carry over.
    pub fn to_device(&mut self, device: &Device, dtype: DType) -> Result<()> {
        if self.device.same_device(device) && self.dtype == dtype {
            return Ok(());
        }
        self.rebuild(device, dtype)
    }

    fn rebuild(&mut self, device: &Device, dtype: DType) -> Result<()> {
        let tensors = {
            let data = self
                .varmap
                .data()
                .lock()
                .map_err(|_| ClassifierError::model("parameter store lock poisoned"))?;
            data.iter()
                .map(|(name, var)| -> Result<(String, Tensor)> {
                    let tensor = var.as_tensor().to_dtype(dtype)?.to_device(device)?;
                    Ok((name.clone(), tensor))
                })
                .collect::<Result<HashMap<String, Tensor>>>()?
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let model = (self.constructor)(vb, &self.config, self.num_labels)?;
        ModelLoader::apply_tensors(&varmap, &tensors)?;

        debug!(device = ?device, dtype = ?dtype, params = tensors.len(), "Moved model");
        self.varmap = varmap;
        self.model = model;
        self.device = device.clone();
        self.dtype = dtype;
        Ok(())
    }

    /// Fine-tune in place; see [`Trainer::train`]
    pub fn fine_tune(&mut self, dataset: &TextDataset, config: &FineTuneConfig) -> Result<TrainingReport> {
        Trainer::new(config).train(self, dataset)
    }

    /// Lazily run evaluation-mode inference over `dataset` in order.
    ///
    /// The batch is scaled by the number of GPUs in use and the model moved
    /// to the primary device first.
    pub fn predict<'a>(
        &'a mut self,
        dataset: &'a TextDataset,
        config: &PredictConfig,
    ) -> Result<Predictions<'a>> {
        config.validate()?;
        let (device, num_gpus) = select_device(config.num_gpus, None)?;
        self.to_device(&device, self.dtype)?;

        let batch_size = config.batch_size * num_gpus.max(1);
        let loader = DataLoader::new(dataset, Sampler::Sequential, batch_size, device)?;
        if config.verbose {
            info!(
                examples = dataset.len(),
                batch_size,
                "***** Running prediction *****"
            );
        }
        Ok(Predictions::new(self, loader.epoch(0)))
    }

    /// Write weights and configuration to `<cache_dir>/fine_tuned/`
    pub fn save_model(&self) -> Result<PathBuf> {
        let dir = self.cache_dir.join(FINE_TUNED_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ClassifierError::io(&dir, e))?;

        let weights = dir.join(WEIGHTS_FILE);
        self.varmap.save(&weights)?;

        let config_path = dir.join(CONFIG_FILE);
        let config = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&config_path, config).map_err(|e| ClassifierError::io(&config_path, e))?;

        info!(dir = %dir.display(), "Saved fine-tuned model");
        Ok(dir)
    }
}

fn check_family(entry: &ModelEntry, config: &serde_json::Value) -> Result<()> {
    let declared = config.get("model_type").and_then(|v| v.as_str());
    match declared {
        Some(model_type) if ModelFamily::from_model_type(model_type) != Some(entry.family) => {
            Err(ClassifierError::model(format!(
                "config.json declares model_type '{}' but {} is a {} model",
                model_type, entry.name, entry.family
            )))
        }
        _ => Ok(()),
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("model_name", &self.model_name)
            .field("num_labels", &self.num_labels)
            .field("cache_dir", &self.cache_dir)
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .finish()
    }
}
