use std::path::{Path, PathBuf};

use super::builder::ClassifierBuilder;
use super::transformer::Transformer;
use crate::config::{FineTuneConfig, LoadConfig, PredictConfig};
use crate::error::Result;
use crate::metrics::TrainingReport;
use crate::model;
use crate::processing::Processor;
use crate::types::TextDataset;

/// Fine-tune and run a pretrained transformer as a text classifier.
///
/// ```no_run
/// # async fn demo() -> nlp_transformers::Result<()> {
/// use nlp_transformers::{FineTuneConfig, PredictConfig, SequenceClassifier};
///
/// let mut classifier = SequenceClassifier::new("bert-base-uncased", 2, "./cache").await?;
/// let processor = classifier.processor(true).await?;
/// let train = processor.preprocess(&["great movie", "awful plot"], Some(&[1, 0]), 64)?;
///
/// let report = classifier.fit(&train, &FineTuneConfig::default())?;
/// println!("{} steps, loss {:.4}", report.global_step, report.average_loss);
///
/// let test = processor.preprocess(&["what a film"], None, 64)?;
/// let classes = classifier.predict(&test, &PredictConfig::default())?;
/// classifier.save_model()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SequenceClassifier {
    transformer: Transformer,
}

impl SequenceClassifier {
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder::new()
    }

    /// Load the pretrained checkpoint registered as `model_name`
    pub async fn new(model_name: &str, num_labels: usize, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder()
            .with_model_name(model_name)
            .with_num_labels(num_labels)
            .with_cache_dir(cache_dir)
            .build()
            .await
    }

    pub async fn from_load_config(config: &LoadConfig) -> Result<Self> {
        Self::builder().with_config(config.clone()).build().await
    }

    pub fn from_transformer(transformer: Transformer) -> Self {
        Self { transformer }
    }

    pub fn list_supported_models() -> Vec<&'static str> {
        model::list_supported_models()
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn transformer_mut(&mut self) -> &mut Transformer {
        &mut self.transformer
    }

    pub fn into_transformer(self) -> Transformer {
        self.transformer
    }

    pub fn model_name(&self) -> &str {
        self.transformer.model_name()
    }

    pub fn set_model_name(&mut self, model_name: &str) -> Result<()> {
        self.transformer.set_model_name(model_name)
    }

    pub fn num_labels(&self) -> usize {
        self.transformer.num_labels()
    }

    pub fn cache_dir(&self) -> &Path {
        self.transformer.cache_dir()
    }

    /// Text processor using this model's tokenizer, fetched into the cache dir
    pub async fn processor(&self, to_lower: bool) -> Result<Processor> {
        Processor::new(self.model_name(), to_lower, self.cache_dir()).await
    }

    /// Fine-tune on a labelled dataset; `report.summary()` gives
    /// `(steps completed, average loss)`
    pub fn fit(&mut self, dataset: &TextDataset, config: &FineTuneConfig) -> Result<TrainingReport> {
        self.transformer.fine_tune(dataset, config)
    }

    /// Predicted class for every example, in dataset order
    pub fn predict(&mut self, dataset: &TextDataset, config: &PredictConfig) -> Result<Vec<u32>> {
        self.transformer.predict(dataset, config)?.classes()
    }

    /// Class probabilities for every example, in dataset order
    pub fn predict_proba(&mut self, dataset: &TextDataset, config: &PredictConfig) -> Result<Vec<Vec<f32>>> {
        self.transformer.predict(dataset, config)?.probabilities()
    }

    /// Write the fine-tuned model to `<cache_dir>/fine_tuned/`
    pub fn save_model(&self) -> Result<PathBuf> {
        self.transformer.save_model()
    }
}
