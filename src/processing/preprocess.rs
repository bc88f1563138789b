// Location: src/processing/preprocess.rs

use std::path::Path;

use tracing::{debug, warn};

use super::{Batch, ModelInputs};
use crate::config::MAX_SEQ_LEN;
use crate::error::{ClassifierError, Result};
use crate::model::{self, ClassifierTokenizer, ModelFamily, ModelLoader};
use crate::types::{TextDataset, TokenizedExample};

/// Clamp a requested sequence length to the hard ceiling, warning when it had to
pub fn clamp_max_len(max_len: usize) -> usize {
    if max_len > MAX_SEQ_LEN {
        warn!(
            requested = max_len,
            "setting max_len to max allowed sequence length: {}", MAX_SEQ_LEN
        );
        MAX_SEQ_LEN
    } else {
        max_len
    }
}

/// Turns raw text into padded, masked id sequences for a classifier
#[derive(Debug, Clone)]
pub struct Processor {
    tokenizer: ClassifierTokenizer,
    to_lower: bool,
}

impl Processor {
    /// Fetch the tokenizer registered for `model_name` into `cache_dir`
    pub async fn new(model_name: &str, to_lower: bool, cache_dir: impl AsRef<Path>) -> Result<Self> {
        let entry = model::lookup(model_name)?;
        let constructor = model::tokenizer_constructor(model_name)?;
        let path = ModelLoader::new(cache_dir.as_ref())
            .fetch_tokenizer(&entry)
            .await?;
        Ok(Self::from_tokenizer(constructor(&path)?, to_lower))
    }

    pub fn from_tokenizer(tokenizer: ClassifierTokenizer, to_lower: bool) -> Self {
        Self { tokenizer, to_lower }
    }

    pub fn tokenizer(&self) -> &ClassifierTokenizer {
        &self.tokenizer
    }

    /// Tokenize, truncate to `max_len - 2`, wrap in `[CLS]`/`[SEP]`, right-pad
    /// with zeros to `max_len` and derive the attention mask.
    pub fn preprocess<S: AsRef<str>>(
        &self,
        texts: &[S],
        labels: Option<&[u32]>,
        max_len: usize,
    ) -> Result<TextDataset> {
        let max_len = clamp_max_len(max_len);
        if max_len < 2 {
            return Err(ClassifierError::invalid_argument(
                "max_len",
                format!("max_len {} leaves no room for the start and end markers", max_len),
            ));
        }
        if let Some(labels) = labels {
            if labels.len() != texts.len() {
                return Err(ClassifierError::invalid_argument(
                    "labels",
                    format!("Got {} labels for {} texts", labels.len(), texts.len()),
                ));
            }
        }

        let mut examples = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let input_ids = self.encode_padded(text.as_ref(), max_len)?;
            let label = labels.map(|l| l[i]);
            examples.push(TokenizedExample::from_padded_ids(input_ids, label));
        }
        debug!(examples = examples.len(), max_len, "Preprocessed texts");

        TextDataset::new(examples)
    }

    fn encode_padded(&self, text: &str, max_len: usize) -> Result<Vec<u32>> {
        let tokens = if self.to_lower {
            self.tokenizer.tokenize(&text.to_lowercase())?
        } else {
            self.tokenizer.tokenize(text)?
        };

        let mut ids = Vec::with_capacity(max_len);
        ids.push(self.tokenizer.cls_token_id());
        ids.extend(tokens.into_iter().take(max_len - 2));
        ids.push(self.tokenizer.sep_token_id());
        ids.resize(max_len, 0);
        Ok(ids)
    }

    /// Select the forward-pass inputs of a batch for the given model.
    ///
    /// Labels are only passed through in training mode, where they are required.
    pub fn get_inputs(batch: &Batch, model_name: &str, train_mode: bool) -> Result<ModelInputs> {
        if ModelFamily::from_model_name(model_name).is_none() {
            return Err(ClassifierError::invalid_argument(
                "model_name",
                format!("Model not supported: {}", model_name),
            ));
        }

        let labels = if train_mode {
            Some(batch.labels.clone().ok_or_else(|| {
                ClassifierError::invalid_argument("labels", "Training batches must carry labels")
            })?)
        } else {
            None
        };

        Ok(ModelInputs {
            input_ids: batch.input_ids.clone(),
            attention_mask: batch.attention_mask.clone(),
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_logs, tiny_processor, tiny_tokenizer};
    use candle_core::Device;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lengths_and_mask_agree() {
        let processor = tiny_processor();
        let texts = ["the movie was great", "bad", "", "i loved the acting . it was good"];
        let dataset = processor.preprocess(&texts, None, 8).unwrap();

        assert_eq!(dataset.len(), texts.len());
        for example in dataset.iter() {
            assert_eq!(example.input_ids.len(), 8);
            assert_eq!(example.attention_mask.len(), 8);
            for (id, mask) in example.input_ids.iter().zip(&example.attention_mask) {
                assert_eq!(*mask == 1, *id != 0);
            }
            assert_eq!(example.label, None);
        }
    }

    #[test]
    fn test_markers_truncation_and_padding() {
        let processor = tiny_processor();
        let tokenizer = tiny_tokenizer();
        let cls = tokenizer.cls_token_id();
        let sep = tokenizer.sep_token_id();

        let dataset = processor.preprocess(&["the movie"], Some(&[1]), 6).unwrap();
        let example = dataset.get(0).unwrap();
        assert_eq!(example.input_ids, vec![cls, 5, 6, sep, 0, 0]);
        assert_eq!(example.attention_mask, vec![1, 1, 1, 1, 0, 0]);
        assert_eq!(example.label, Some(1));

        // 6 word pieces squeezed into max_len 5 keep only the first 3
        let dataset = processor.preprocess(&["i loved the plot . it"], None, 5).unwrap();
        assert_eq!(dataset.get(0).unwrap().input_ids, vec![cls, 14, 15, 5, sep]);
    }

    #[test]
    fn test_max_len_is_clamped() {
        let (clamped, logs) = capture_logs(|| clamp_max_len(4096));
        assert_eq!(clamped, MAX_SEQ_LEN);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("setting max_len to max allowed sequence length: 512"));

        let (kept, logs) = capture_logs(|| clamp_max_len(128));
        assert_eq!(kept, 128);
        assert!(logs.is_empty());

        let dataset = tiny_processor().preprocess(&["good"], None, 1000).unwrap();
        assert_eq!(dataset.seq_len(), MAX_SEQ_LEN);
    }

    #[test]
    fn test_invalid_arguments() {
        let processor = tiny_processor();
        assert!(processor.preprocess(&["good"], None, 1).unwrap_err().is_invalid_argument());
        assert!(processor
            .preprocess(&["good", "bad"], Some(&[1]), 8)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_to_lower() {
        let processor = Processor::from_tokenizer(tiny_tokenizer(), true);
        let lowered = processor.preprocess(&["The MOVIE"], None, 6).unwrap();
        let plain = tiny_processor().preprocess(&["The MOVIE"], None, 6).unwrap();
        assert_eq!(lowered.get(0).unwrap().input_ids[1..3].to_vec(), vec![5, 6]);
        assert_eq!(plain.get(0).unwrap().input_ids[1], 1); // [UNK]
    }

    #[test]
    fn test_get_inputs() {
        let dataset = tiny_processor().preprocess(&["good", "bad"], Some(&[1, 0]), 4).unwrap();
        let batch = Batch::from_indices(&dataset, &[0, 1], &Device::Cpu).unwrap();

        let train = Processor::get_inputs(&batch, "bert-base-uncased", true).unwrap();
        assert!(train.labels.is_some());
        let eval = Processor::get_inputs(&batch, "distilbert-base-cased", false).unwrap();
        assert!(eval.labels.is_none());

        let err = Processor::get_inputs(&batch, "gpt2", true).unwrap_err();
        assert!(err.to_string().contains("gpt2"));
    }

    #[test]
    fn test_training_inputs_need_labels() {
        let dataset = tiny_processor().preprocess(&["good"], None, 4).unwrap();
        let batch = Batch::from_indices(&dataset, &[0], &Device::Cpu).unwrap();
        assert!(Processor::get_inputs(&batch, "bert-base-cased", true).is_err());
        assert!(Processor::get_inputs(&batch, "bert-base-cased", false).is_ok());
    }

    #[test]
    fn test_unknown_model_fails_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let err = tokio_test::block_on(Processor::new("albert-base-v2", true, dir.path())).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("list_supported_models"));
    }
}
