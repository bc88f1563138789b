//! Common type definitions used throughout the crate

use serde::{Serialize, Deserialize};

use crate::error::{ClassifierError, Result};

/// A single padded, tokenized example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    /// Token ids, right-padded with zeros to the dataset length
    pub input_ids: Vec<u32>,
    /// 1 where `input_ids` holds a real token, 0 on padding
    pub attention_mask: Vec<u32>,
    /// Class index, present for training data
    pub label: Option<u32>,
}

impl TokenizedExample {
    /// Build an example from padded ids, deriving the mask from non-zero ids
    pub fn from_padded_ids(input_ids: Vec<u32>, label: Option<u32>) -> Self {
        let attention_mask = input_ids.iter().map(|&id| u32::from(id != 0)).collect();
        Self {
            input_ids,
            attention_mask,
            label,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Ordered collection of equally sized examples
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextDataset {
    examples: Vec<TokenizedExample>,
    seq_len: usize,
}

impl TextDataset {
    /// Create a dataset, checking that every example has the same length and
    /// that labels are either present everywhere or nowhere
    pub fn new(examples: Vec<TokenizedExample>) -> Result<Self> {
        let seq_len = examples.first().map(|e| e.len()).unwrap_or(0);
        let labelled = examples.first().map(|e| e.label.is_some()).unwrap_or(false);

        for (i, example) in examples.iter().enumerate() {
            if example.len() != seq_len || example.attention_mask.len() != seq_len {
                return Err(ClassifierError::invalid_argument(
                    "examples",
                    format!(
                        "Example {} has length {} (mask {}), expected {}",
                        i,
                        example.len(),
                        example.attention_mask.len(),
                        seq_len
                    ),
                ));
            }
            if example.label.is_some() != labelled {
                return Err(ClassifierError::invalid_argument(
                    "labels",
                    format!("Example {} disagrees with the rest of the dataset on having a label", i),
                ));
            }
        }

        Ok(Self { examples, seq_len })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Padded length shared by every example
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn has_labels(&self) -> bool {
        self.examples.first().map(|e| e.label.is_some()).unwrap_or(false)
    }

    pub fn get(&self, index: usize) -> Option<&TokenizedExample> {
        self.examples.get(index)
    }

    pub fn examples(&self) -> &[TokenizedExample] {
        &self.examples
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenizedExample> {
        self.examples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_from_padded_ids() {
        let example = TokenizedExample::from_padded_ids(vec![101, 7, 102, 0, 0], Some(1));
        assert_eq!(example.attention_mask, vec![1, 1, 1, 0, 0]);
        assert_eq!(example.len(), 5);
    }

    #[test]
    fn test_dataset_rejects_ragged_examples() {
        let result = TextDataset::new(vec![
            TokenizedExample::from_padded_ids(vec![101, 102, 0], None),
            TokenizedExample::from_padded_ids(vec![101, 102], None),
        ]);
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_dataset_rejects_mixed_labels() {
        let result = TextDataset::new(vec![
            TokenizedExample::from_padded_ids(vec![101, 102], Some(0)),
            TokenizedExample::from_padded_ids(vec![101, 102], None),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_dataset() {
        let dataset = TextDataset::new(Vec::new()).unwrap();
        assert!(dataset.is_empty());
        assert!(!dataset.has_labels());
        assert_eq!(dataset.seq_len(), 0);
    }
}
