use candle_core::{Device, Tensor};

use super::Sampler;
use crate::error::{ClassifierError, Result};
use crate::types::TextDataset;

/// One mini-batch moved onto the target device
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(batch, seq_len)` u32 token ids
    pub input_ids: Tensor,
    /// `(batch, seq_len)` u32 attention mask
    pub attention_mask: Tensor,
    /// `(batch,)` u32 class indices, when the dataset is labelled
    pub labels: Option<Tensor>,
}

impl Batch {
    /// Gather the examples at `indices` into tensors on `device`
    pub fn from_indices(dataset: &TextDataset, indices: &[usize], device: &Device) -> Result<Self> {
        let seq_len = dataset.seq_len();
        let mut ids = Vec::with_capacity(indices.len() * seq_len);
        let mut mask = Vec::with_capacity(indices.len() * seq_len);
        let mut labels = Vec::with_capacity(indices.len());

        for &index in indices {
            let example = dataset.get(index).ok_or_else(|| {
                ClassifierError::invalid_argument(
                    "index",
                    format!("Index {} is outside a dataset of {} examples", index, dataset.len()),
                )
            })?;
            ids.extend_from_slice(&example.input_ids);
            mask.extend_from_slice(&example.attention_mask);
            if let Some(label) = example.label {
                labels.push(label);
            }
        }

        let shape = (indices.len(), seq_len);
        let labels = if dataset.has_labels() {
            Some(Tensor::from_vec(labels, indices.len(), device)?)
        } else {
            None
        };

        Ok(Self {
            input_ids: Tensor::from_vec(ids, shape, device)?,
            attention_mask: Tensor::from_vec(mask, shape, device)?,
            labels,
        })
    }

    pub fn size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }
}

/// Tensors handed to the model's forward pass
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    /// Only populated in training mode
    pub labels: Option<Tensor>,
}

/// Splits a dataset into device-resident mini-batches in sampler order
pub struct DataLoader<'a> {
    dataset: &'a TextDataset,
    sampler: Sampler,
    batch_size: usize,
    device: Device,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a TextDataset, sampler: Sampler, batch_size: usize, device: Device) -> Result<Self> {
        if batch_size == 0 {
            return Err(ClassifierError::invalid_argument(
                "batch_size",
                "Batch size must be positive",
            ));
        }
        Ok(Self {
            dataset,
            sampler,
            batch_size,
            device,
        })
    }

    /// Number of batches per epoch
    pub fn len(&self) -> usize {
        self.sampler.num_samples(self.dataset.len()).div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches for one epoch; the sampler reshuffles per epoch
    pub fn epoch(&self, epoch: usize) -> Batches<'a> {
        Batches {
            dataset: self.dataset,
            indices: self.sampler.indices(self.dataset.len(), epoch),
            batch_size: self.batch_size,
            position: 0,
            device: self.device.clone(),
        }
    }
}

/// Iterator over the batches of one epoch
pub struct Batches<'a> {
    dataset: &'a TextDataset,
    indices: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: Device,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.indices.len());
        let batch = Batch::from_indices(self.dataset, &self.indices[self.position..end], &self.device);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.indices.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}
