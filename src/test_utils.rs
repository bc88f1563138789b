//! Tiny in-memory models and tokenizers shared by unit tests

use std::io;
use std::sync::{Arc, Mutex};

use candle_core::Device;
use serde_json::json;

use crate::engine::Transformer;
use crate::model::{ClassifierTokenizer, ModelFamily};
use crate::processing::Processor;
use crate::types::TextDataset;

pub(crate) const TINY_VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "movie", "was", "great", "terrible",
    "good", "bad", "plot", "acting", "i", "loved", "hated", "it", "a", "##s", ".",
];

pub(crate) fn tiny_tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = TINY_VOCAB
        .iter()
        .enumerate()
        .map(|(i, t)| (t.to_string(), json!(i)))
        .collect();

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": false
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordPiece",
            "unk_token": "[UNK]",
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    })
    .to_string()
}

pub(crate) fn tiny_tokenizer() -> ClassifierTokenizer {
    ClassifierTokenizer::from_bytes(tiny_tokenizer_json().as_bytes(), ModelFamily::Bert)
        .expect("tiny tokenizer should parse")
}

pub(crate) fn tiny_processor() -> Processor {
    Processor::from_tokenizer(tiny_tokenizer(), false)
}

pub(crate) fn tiny_bert_config() -> serde_json::Value {
    json!({
        "model_type": "bert",
        "vocab_size": TINY_VOCAB.len(),
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": 64,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": false,
        "classifier_dropout": null
    })
}

pub(crate) fn tiny_distilbert_config() -> serde_json::Value {
    json!({
        "model_type": "distilbert",
        "vocab_size": TINY_VOCAB.len(),
        "dim": 8,
        "n_layers": 1,
        "n_heads": 2,
        "hidden_dim": 16,
        "activation": "gelu",
        "max_position_embeddings": 64,
        "initializer_range": 0.02,
        "pad_token_id": 0,
        "seq_classif_dropout": 0.2
    })
}

/// Randomly initialized tiny BERT classifier on the CPU
pub(crate) fn tiny_classifier(num_labels: usize, cache_dir: &std::path::Path) -> Transformer {
    Transformer::from_config(
        "bert-base-uncased",
        tiny_bert_config(),
        num_labels,
        cache_dir,
        Device::Cpu,
    )
    .expect("tiny classifier should build")
}

/// Labelled sentiment-style examples cycling through a few short sentences
pub(crate) fn tiny_dataset(n: usize, max_len: usize) -> TextDataset {
    let sentences = [
        ("i loved the movie", 1u32),
        ("the plot was terrible", 0),
        ("great acting", 1),
        ("i hated it", 0),
        ("a good movie", 1),
    ];
    let texts: Vec<&str> = (0..n).map(|i| sentences[i % sentences.len()].0).collect();
    let labels: Vec<u32> = (0..n).map(|i| sentences[i % sentences.len()].1).collect();
    tiny_processor()
        .preprocess(&texts, Some(labels.as_slice()), max_len)
        .expect("tiny dataset should preprocess")
}

/// In-memory log sink for asserting on emitted events
#[derive(Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return what it logged
pub(crate) fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (out, logs)
}
