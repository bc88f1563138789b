use std::path::PathBuf;

use candle_core::Device;

use super::classifier::SequenceClassifier;
use super::transformer::Transformer;
use crate::config::LoadConfig;
use crate::error::Result;
use crate::gpu::select_device;

/// Builder for constructing a [`SequenceClassifier`]
pub struct ClassifierBuilder {
    config: LoadConfig,
    device: Option<Device>,
}

impl ClassifierBuilder {
    /// Create a new builder with the default load configuration
    pub fn new() -> Self {
        Self {
            config: LoadConfig::default(),
            device: None,
        }
    }

    pub fn with_config(mut self, config: LoadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.config.model_name = model_name.into();
        self
    }

    pub fn with_num_labels(mut self, num_labels: usize) -> Self {
        self.config.num_labels = num_labels;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir.into();
        self
    }

    /// Reload weights previously written by `save_model` instead of
    /// downloading the pretrained checkpoint
    pub fn with_fine_tuned_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.load_model_from_dir = Some(dir.into());
        self
    }

    /// Device the weights are first loaded onto; defaults to the first CUDA
    /// device when one is present
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Build the classifier, downloading weights when needed
    pub async fn build(self) -> Result<SequenceClassifier> {
        self.config.validate()?;

        let device = match self.device {
            Some(device) => device,
            None => select_device(Some(1), None)?.0,
        };
        let transformer = Transformer::from_pretrained(&self.config, device).await?;
        Ok(SequenceClassifier::from_transformer(transformer))
    }
}

impl Default for ClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_classifier;

    #[tokio::test]
    async fn test_builder_rejects_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClassifierBuilder::default()
            .with_model_name("xlnet-base-cased")
            .with_cache_dir(dir.path())
            .build()
            .await;
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn test_builder_validation() {
        let result = ClassifierBuilder::new().with_num_labels(0).build().await;
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn test_builder_reloads_fine_tuned_dir() {
        let dir = tempfile::tempdir().unwrap();
        let saved = tiny_classifier(3, dir.path()).save_model().unwrap();

        let classifier = ClassifierBuilder::new()
            .with_model_name("bert-base-uncased")
            .with_num_labels(3)
            .with_cache_dir(dir.path())
            .with_fine_tuned_dir(&saved)
            .with_device(Device::Cpu)
            .build()
            .await
            .unwrap();
        assert_eq!(classifier.num_labels(), 3);
        assert_eq!(classifier.model_name(), "bert-base-uncased");
    }
}
