use candle_core::{DType, Tensor, D};

use super::transformer::Transformer;
use crate::error::Result;
use crate::processing::{Batches, Processor};

/// Lazy per-batch logits produced by [`Transformer::predict`].
///
/// Each item is a `(batch, num_labels)` f32 tensor detached from any graph.
/// The sequence ends with the dataset and cannot be restarted.
pub struct Predictions<'a> {
    model: &'a Transformer,
    batches: Batches<'a>,
}

impl<'a> Predictions<'a> {
    pub(crate) fn new(model: &'a Transformer, batches: Batches<'a>) -> Self {
        Self { model, batches }
    }

    /// Drain the remaining batches into one `(examples, num_labels)` tensor
    pub fn concat(self) -> Result<Option<Tensor>> {
        let logits = self.collect::<Result<Vec<_>>>()?;
        if logits.is_empty() {
            return Ok(None);
        }
        Ok(Some(Tensor::cat(&logits, 0)?))
    }

    /// Arg-max class of every remaining example
    pub fn classes(self) -> Result<Vec<u32>> {
        let mut classes = Vec::new();
        for logits in self {
            classes.extend(argmax(&logits?)?);
        }
        Ok(classes)
    }

    /// Softmax probabilities of every remaining example
    pub fn probabilities(self) -> Result<Vec<Vec<f32>>> {
        let mut probs = Vec::new();
        for logits in self {
            probs.extend(softmax(&logits?)?);
        }
        Ok(probs)
    }
}

impl Iterator for Predictions<'_> {
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batches.next()?;
        Some(batch.and_then(|batch| {
            let inputs = Processor::get_inputs(&batch, self.model.model_name(), false)?;
            let logits = self.model.forward(&inputs, false)?;
            Ok(logits.detach().to_dtype(DType::F32)?)
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl ExactSizeIterator for Predictions<'_> {}

/// Index of the largest logit in each row
pub fn argmax(logits: &Tensor) -> Result<Vec<u32>> {
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

/// Row-wise softmax of `(batch, num_labels)` logits
pub fn softmax(logits: &Tensor) -> Result<Vec<Vec<f32>>> {
    let probs = candle_nn::ops::softmax_last_dim(&logits.to_dtype(DType::F32)?)?;
    Ok(probs.to_vec2::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictConfig;
    use crate::test_utils::{tiny_classifier, tiny_dataset};
    use candle_core::Device;
    use pretty_assertions::assert_eq;

    fn predict_config(batch_size: usize) -> PredictConfig {
        PredictConfig {
            batch_size,
            num_gpus: Some(0),
            verbose: false,
        }
    }

    #[test]
    fn test_argmax_and_softmax() {
        let logits = Tensor::new(&[[0.1f32, 2.0, -1.0], [3.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        assert_eq!(argmax(&logits).unwrap(), vec![1, 0]);

        let probs = softmax(&logits).unwrap();
        for row in &probs {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(probs[1][0] > probs[1][1]);
    }

    #[test]
    fn test_batches_are_lazy_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = tiny_classifier(3, dir.path());
        let dataset = tiny_dataset(5, 8);

        let mut predictions = model.predict(&dataset, &predict_config(2)).unwrap();
        assert_eq!(predictions.len(), 3);
        let first = predictions.next().unwrap().unwrap();
        assert_eq!(first.dims(), &[2, 3]);
        assert_eq!(predictions.len(), 2);

        let rest: Vec<Tensor> = predictions.map(|l| l.unwrap()).collect();
        assert_eq!(rest[1].dims(), &[1, 3]);
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = tiny_classifier(2, dir.path());
        let dataset = tiny_dataset(4, 8);

        let first = model
            .predict(&dataset, &predict_config(4))
            .unwrap()
            .concat()
            .unwrap()
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let second = model
            .predict(&dataset, &predict_config(3))
            .unwrap()
            .concat()
            .unwrap()
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(first.len(), 4);
        for (a, b) in first.iter().flatten().zip(second.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_classes_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = tiny_classifier(3, dir.path());
        let dataset = tiny_dataset(7, 8);

        let classes = model.predict(&dataset, &predict_config(2)).unwrap().classes().unwrap();
        assert_eq!(classes.len(), 7);
        assert!(classes.iter().all(|&c| c < 3));
    }
}
