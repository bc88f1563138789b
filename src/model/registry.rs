// Location: src/model/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use candle_nn::VarBuilder;
use lazy_static::lazy_static;

use super::{BertClassifier, ClassifierTokenizer, DistilBertClassifier, SequenceClassification};
use crate::error::{ClassifierError, Result};

/// Builds a classifier from a variable builder, the raw `config.json` and a label count
pub type ModelConstructor =
    fn(VarBuilder, &serde_json::Value, usize) -> candle_core::Result<Box<dyn SequenceClassification>>;

/// Loads a tokenizer from a `tokenizer.json` file
pub type TokenizerConstructor = fn(&Path) -> Result<ClassifierTokenizer>;

/// Architecture family of a registered checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Bert,
    DistilBert,
}

impl ModelFamily {
    /// Model type as it appears in the name prefix and in `config.json`
    pub fn model_type(self) -> &'static str {
        match self {
            ModelFamily::Bert => "bert",
            ModelFamily::DistilBert => "distilbert",
        }
    }

    pub fn from_model_type(model_type: &str) -> Option<Self> {
        match model_type {
            "bert" => Some(ModelFamily::Bert),
            "distilbert" => Some(ModelFamily::DistilBert),
            _ => None,
        }
    }

    /// Family of a model name, judged by its prefix before the first '-'
    pub fn from_model_name(model_name: &str) -> Option<Self> {
        model_name.split('-').next().and_then(Self::from_model_type)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_type())
    }
}

/// Registry entry for one supported checkpoint
#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub name: &'static str,
    pub family: ModelFamily,
    /// Repository on the HuggingFace hub holding the weights
    pub hub_repo: &'static str,
    /// Whether the vocabulary was built from lower-cased text
    pub lower_case: bool,
}

const SUPPORTED_MODELS: &[ModelEntry] = &[
    ModelEntry { name: "bert-base-uncased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-uncased", lower_case: true },
    ModelEntry { name: "bert-large-uncased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-large-uncased", lower_case: true },
    ModelEntry { name: "bert-base-cased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-cased", lower_case: false },
    ModelEntry { name: "bert-large-cased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-large-cased", lower_case: false },
    ModelEntry { name: "bert-base-multilingual-uncased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-multilingual-uncased", lower_case: true },
    ModelEntry { name: "bert-base-multilingual-cased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-multilingual-cased", lower_case: false },
    ModelEntry { name: "bert-base-chinese", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-chinese", lower_case: false },
    ModelEntry { name: "bert-base-german-cased", family: ModelFamily::Bert, hub_repo: "google-bert/bert-base-german-cased", lower_case: false },
    ModelEntry { name: "bert-large-uncased-whole-word-masking", family: ModelFamily::Bert, hub_repo: "google-bert/bert-large-uncased-whole-word-masking", lower_case: true },
    ModelEntry { name: "bert-large-cased-whole-word-masking", family: ModelFamily::Bert, hub_repo: "google-bert/bert-large-cased-whole-word-masking", lower_case: false },
    ModelEntry { name: "distilbert-base-uncased", family: ModelFamily::DistilBert, hub_repo: "distilbert/distilbert-base-uncased", lower_case: true },
    ModelEntry { name: "distilbert-base-uncased-distilled-squad", family: ModelFamily::DistilBert, hub_repo: "distilbert/distilbert-base-uncased-distilled-squad", lower_case: true },
    ModelEntry { name: "distilbert-base-cased", family: ModelFamily::DistilBert, hub_repo: "distilbert/distilbert-base-cased", lower_case: false },
    ModelEntry { name: "distilbert-base-multilingual-cased", family: ModelFamily::DistilBert, hub_repo: "distilbert/distilbert-base-multilingual-cased", lower_case: false },
    ModelEntry { name: "distilbert-base-german-cased", family: ModelFamily::DistilBert, hub_repo: "distilbert/distilbert-base-german-cased", lower_case: false },
];

fn model_for_family(family: ModelFamily) -> ModelConstructor {
    match family {
        ModelFamily::Bert => BertClassifier::load_boxed,
        ModelFamily::DistilBert => DistilBertClassifier::load_boxed,
    }
}

fn tokenizer_for_family(family: ModelFamily) -> TokenizerConstructor {
    match family {
        ModelFamily::Bert => ClassifierTokenizer::bert_from_file,
        ModelFamily::DistilBert => ClassifierTokenizer::distilbert_from_file,
    }
}

lazy_static! {
    static ref ENTRIES: HashMap<&'static str, ModelEntry> =
        SUPPORTED_MODELS.iter().map(|e| (e.name, *e)).collect();
    static ref MODEL_CLASS: HashMap<&'static str, ModelConstructor> = SUPPORTED_MODELS
        .iter()
        .map(|e| (e.name, model_for_family(e.family)))
        .collect();
    static ref TOKENIZER_CLASS: HashMap<&'static str, TokenizerConstructor> = SUPPORTED_MODELS
        .iter()
        .map(|e| (e.name, tokenizer_for_family(e.family)))
        .collect();
}

fn unsupported(model_name: &str) -> ClassifierError {
    ClassifierError::invalid_argument(
        "model_name",
        format!(
            "Model name {} is not supported. Call list_supported_models() to get all supported model names.",
            model_name
        ),
    )
}

/// Every registered model name, in registration order
pub fn list_supported_models() -> Vec<&'static str> {
    SUPPORTED_MODELS.iter().map(|e| e.name).collect()
}

pub fn lookup(model_name: &str) -> Result<ModelEntry> {
    ENTRIES.get(model_name).copied().ok_or_else(|| unsupported(model_name))
}

pub fn model_constructor(model_name: &str) -> Result<ModelConstructor> {
    MODEL_CLASS.get(model_name).copied().ok_or_else(|| unsupported(model_name))
}

pub fn tokenizer_constructor(model_name: &str) -> Result<TokenizerConstructor> {
    TOKENIZER_CLASS.get(model_name).copied().ok_or_else(|| unsupported(model_name))
}
