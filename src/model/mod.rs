//! Model module: registry of supported checkpoints, classification heads and
//! the loaders that pull weights and tokenizers into place

mod bert;
mod distilbert;
mod layers;
mod loader;
mod registry;
mod tokenizer;

use candle_core::Tensor;

pub use bert::{BertClassifier, BertConfig};
pub use distilbert::{DistilBertClassifier, DistilBertConfig};
pub use loader::{ModelFiles, ModelLoader, WeightLoadReport};
pub use registry::{
    list_supported_models, lookup, model_constructor, tokenizer_constructor, ModelConstructor,
    ModelEntry, ModelFamily, TokenizerConstructor,
};
pub use tokenizer::{ClassifierTokenizer, TokenizerError};

// File names expected in a hub repository or a saved model directory
pub(crate) const CONFIG_FILE: &str = "config.json";
pub(crate) const WEIGHTS_FILE: &str = "model.safetensors";
pub(crate) const TOKENIZER_FILE: &str = "tokenizer.json";

// Parameters whose shape depends on the number of labels
pub(crate) const CLASSIFIER_PREFIX: &str = "classifier.";

/// A pretrained encoder topped with a sequence classification head
pub trait SequenceClassification: Send + Sync {
    /// Compute `(batch, num_labels)` logits.
    ///
    /// `input_ids` and `attention_mask` are `(batch, seq_len)` u32 tensors;
    /// `train` enables dropout.
    fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor>;

    fn family(&self) -> ModelFamily;
}
