use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::{debug, info, warn};

use super::registry::ModelEntry;
use super::{CLASSIFIER_PREFIX, CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use crate::error::{ClassifierError, Result};

/// Local paths of the files making up a checkpoint
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Outcome of copying checkpoint tensors into a freshly built model
#[derive(Debug, Clone, Default)]
pub struct WeightLoadReport {
    /// Parameters filled from the checkpoint
    pub loaded: usize,
    /// Model parameters absent from the checkpoint, left at their initial values
    pub newly_initialized: Vec<String>,
    /// Checkpoint tensors the model has no parameter for
    pub unused: Vec<String>,
}

/// Resolves checkpoints either from the HuggingFace hub (cached under
/// `cache_dir`) or from a local directory
pub struct ModelLoader {
    cache_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download (or reuse from cache) config and weights for a registered model
    pub async fn fetch_pretrained(&self, entry: &ModelEntry) -> Result<ModelFiles> {
        let mut paths = self.fetch(entry.hub_repo, &[CONFIG_FILE, WEIGHTS_FILE]).await?;
        let weights = paths.pop().ok_or_else(|| ClassifierError::model("weights path missing"))?;
        let config = paths.pop().ok_or_else(|| ClassifierError::model("config path missing"))?;
        Ok(ModelFiles { config, weights })
    }

    /// Download (or reuse from cache) the `tokenizer.json` of a registered model
    pub async fn fetch_tokenizer(&self, entry: &ModelEntry) -> Result<PathBuf> {
        let mut paths = self.fetch(entry.hub_repo, &[TOKENIZER_FILE]).await?;
        paths.pop().ok_or_else(|| ClassifierError::model("tokenizer path missing"))
    }

    async fn fetch(&self, repo: &'static str, files: &[&'static str]) -> Result<Vec<PathBuf>> {
        let cache_dir = self.cache_dir.clone();
        let files = files.to_vec();
        info!(repo, cache_dir = %cache_dir.display(), "Fetching pretrained files");

        // hf-hub's sync client blocks on network I/O
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_dir).map_err(|e| ClassifierError::io(&cache_dir, e))?;
            let api = hf_hub::api::sync::ApiBuilder::new()
                .with_cache_dir(cache_dir)
                .build()
                .map_err(|e| download_error(repo, "Failed to initialize HF API", e))?;
            let hub_repo = api.model(repo.to_string());

            files
                .iter()
                .map(|file| {
                    hub_repo
                        .get(file)
                        .map_err(|e| download_error(repo, &format!("Failed to download {}", file), e))
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| ClassifierError::DownloadError {
            repo: repo.to_string(),
            message: "Download task failed".to_string(),
            source: Some(Box::new(e)),
        })?
    }

    /// Locate config and weights in a directory written by `save_model`
    pub fn local_files(dir: impl AsRef<Path>) -> Result<ModelFiles> {
        let dir = dir.as_ref();
        let files = ModelFiles {
            config: dir.join(CONFIG_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        for path in [&files.config, &files.weights] {
            if !path.is_file() {
                return Err(ClassifierError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
                ));
            }
        }
        Ok(files)
    }

    pub fn read_config(path: impl AsRef<Path>) -> Result<serde_json::Value> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ClassifierError::io(path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Copy checkpoint tensors into the matching variables of `varmap`.
    ///
    /// Variables without a checkpoint tensor keep their initialization (the
    /// classification head of a pretrained encoder, typically). So does a
    /// `classifier.*` tensor saved for a different number of labels; any
    /// other shape mismatch is an error.
    pub fn load_weights(varmap: &VarMap, path: impl AsRef<Path>, device: &Device) -> Result<WeightLoadReport> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)?;
        let report = Self::apply_tensors(varmap, &tensors)?;

        info!(
            path = %path.display(),
            loaded = report.loaded,
            "Loaded checkpoint weights"
        );
        if !report.newly_initialized.is_empty() {
            warn!(
                params = ?report.newly_initialized,
                "Some weights were not found in the checkpoint and are newly initialized; \
                 fine-tune the model before using it for predictions"
            );
        }
        if !report.unused.is_empty() {
            debug!(count = report.unused.len(), "Ignored checkpoint tensors without a matching parameter");
        }
        Ok(report)
    }

    pub(crate) fn apply_tensors(
        varmap: &VarMap,
        tensors: &HashMap<String, Tensor>,
    ) -> Result<WeightLoadReport> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| ClassifierError::model("parameter store lock poisoned"))?;

        let mut report = WeightLoadReport::default();
        let mut used = Vec::with_capacity(data.len());

        for (name, var) in data.iter() {
            let found = checkpoint_names(name)
                .into_iter()
                .find_map(|candidate| tensors.get(&candidate).map(|t| (candidate, t)));

            match found {
                Some((key, tensor)) => {
                    // head sized for another label count
                    if tensor.dims() != var.dims() && name.starts_with(CLASSIFIER_PREFIX) {
                        debug!(param = %name, saved = ?tensor.dims(), "Skipping classifier head of another shape");
                        report.newly_initialized.push(name.clone());
                        continue;
                    }
                    if tensor.dims() != var.dims() {
                        return Err(ClassifierError::model(format!(
                            "Checkpoint tensor {} has shape {:?}, model expects {:?}",
                            key,
                            tensor.dims(),
                            var.dims()
                        )));
                    }
                    var.set(&tensor.to_dtype(var.dtype())?)?;
                    report.loaded += 1;
                    used.push(key);
                }
                None => report.newly_initialized.push(name.clone()),
            }
        }

        report.newly_initialized.sort();
        report.unused = tensors
            .keys()
            .filter(|k| !used.contains(k))
            .cloned()
            .collect();
        report.unused.sort();
        Ok(report)
    }
}

/// Names a parameter may be stored under; older BERT checkpoints use
/// `gamma`/`beta` for LayerNorm scale and shift.
fn checkpoint_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if name.contains("LayerNorm") {
        if let Some(prefix) = name.strip_suffix(".weight") {
            names.push(format!("{}.gamma", prefix));
        } else if let Some(prefix) = name.strip_suffix(".bias") {
            names.push(format!("{}.beta", prefix));
        }
    }
    names
}

fn download_error(
    repo: &str,
    message: &str,
    source: hf_hub::api::sync::ApiError,
) -> ClassifierError {
    ClassifierError::DownloadError {
        repo: repo.to_string(),
        message: format!("{}: {}", message, source),
        source: Some(Box::new(source)),
    }
}
