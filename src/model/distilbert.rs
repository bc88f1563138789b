use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{embedding, Activation, Dropout, Embedding, VarBuilder};
use candle_transformers::models::with_tracing::Linear;
use serde::Deserialize;

use super::layers::{additive_mask, linear, LayerNorm, SelfAttention};
use super::{ModelFamily, SequenceClassification};

const LAYER_NORM_EPS: f64 = 1e-12;

fn default_activation() -> Activation {
    Activation::Gelu
}

fn default_dropout() -> f64 {
    0.1
}

fn default_seq_classif_dropout() -> f64 {
    0.2
}

/// The fields of a DistilBERT `config.json` the classifier reads
#[derive(Debug, Clone, Deserialize)]
pub struct DistilBertConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub hidden_dim: usize,
    #[serde(default = "default_activation")]
    pub activation: Activation,
    pub max_position_embeddings: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    #[serde(default = "default_dropout")]
    pub attention_dropout: f64,
    #[serde(default = "default_seq_classif_dropout")]
    pub seq_classif_dropout: f64,
}

struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(config.vocab_size, config.dim, vb.pp("word_embeddings"))?,
            position_embeddings: embedding(
                config.max_position_embeddings,
                config.dim,
                vb.pp("position_embeddings"),
            )?,
            layer_norm: LayerNorm::new(config.dim, LAYER_NORM_EPS, vb.pp("LayerNorm"))?,
            dropout: Dropout::new(config.dropout as f32),
        })
    }

    fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let xs = self
            .word_embeddings
            .forward(input_ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?;
        self.dropout.forward(&self.layer_norm.forward(&xs)?, train)
    }
}

struct TransformerBlock {
    attention: SelfAttention,
    out_lin: Linear,
    sa_layer_norm: LayerNorm,
    lin1: Linear,
    lin2: Linear,
    output_layer_norm: LayerNorm,
    activation: Activation,
    dropout: Dropout,
}

impl TransformerBlock {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let dim = config.dim;
        Ok(Self {
            attention: SelfAttention::new(
                dim,
                config.n_heads,
                config.attention_dropout,
                ["q_lin", "k_lin", "v_lin"],
                vb.pp("attention"),
            )?,
            out_lin: linear(dim, dim, vb.pp("attention.out_lin"))?,
            sa_layer_norm: LayerNorm::new(dim, LAYER_NORM_EPS, vb.pp("sa_layer_norm"))?,
            lin1: linear(dim, config.hidden_dim, vb.pp("ffn.lin1"))?,
            lin2: linear(config.hidden_dim, dim, vb.pp("ffn.lin2"))?,
            output_layer_norm: LayerNorm::new(dim, LAYER_NORM_EPS, vb.pp("output_layer_norm"))?,
            activation: config.activation,
            dropout: Dropout::new(config.dropout as f32),
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.out_lin.forward(&self.attention.forward(xs, mask, train)?)?;
        let xs = self.sa_layer_norm.forward(&(attended + xs)?)?;

        let hidden = self.activation.forward(&self.lin1.forward(&xs)?)?;
        let hidden = self.dropout.forward(&self.lin2.forward(&hidden)?, train)?;
        self.output_layer_norm.forward(&(hidden + xs)?)
    }
}

/// DistilBERT encoder with the `pre_classifier` + linear head of
/// `DistilBertForSequenceClassification`
pub struct DistilBertClassifier {
    embeddings: Embeddings,
    layers: Vec<TransformerBlock>,
    pre_classifier: Linear,
    dropout: Dropout,
    classifier: Linear,
}

impl DistilBertClassifier {
    pub fn load(vb: VarBuilder, config: &serde_json::Value, num_labels: usize) -> Result<Self> {
        let config: DistilBertConfig = serde_json::from_value(config.clone())
            .map_err(|e| candle_core::Error::Msg(format!("invalid DistilBERT config: {}", e)))?;

        let distilbert = vb.pp("distilbert");
        let embeddings = Embeddings::load(distilbert.pp("embeddings"), &config)?;
        let layers = (0..config.n_layers)
            .map(|i| TransformerBlock::load(distilbert.pp(format!("transformer.layer.{}", i)), &config))
            .collect::<Result<Vec<_>>>()?;
        let pre_classifier = linear(config.dim, config.dim, vb.pp("pre_classifier"))?;
        let classifier = linear(config.dim, num_labels, vb.pp("classifier"))?;

        Ok(Self {
            embeddings,
            layers,
            pre_classifier,
            dropout: Dropout::new(config.seq_classif_dropout as f32),
            classifier,
        })
    }

    pub(crate) fn load_boxed(
        vb: VarBuilder,
        config: &serde_json::Value,
        num_labels: usize,
    ) -> Result<Box<dyn SequenceClassification>> {
        Ok(Box::new(Self::load(vb, config, num_labels)?))
    }
}

impl SequenceClassification for DistilBertClassifier {
    fn forward_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = self.embeddings.forward(input_ids, train)?;
        let mask = additive_mask(attention_mask, hidden.dtype())?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask, train)?;
        }
        let pooled = self.pre_classifier.forward(&hidden.i((.., 0))?)?.relu()?;
        let pooled = self.dropout.forward(&pooled, train)?;
        self.classifier.forward(&pooled)
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::DistilBert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_distilbert_config;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn batch(device: &Device) -> Result<(Tensor, Tensor)> {
        let ids = Tensor::new(&[[2u32, 5, 3, 0], [2, 6, 7, 3]], device)?;
        let mask = Tensor::new(&[[1u32, 1, 1, 0], [1, 1, 1, 1]], device)?;
        Ok((ids, mask))
    }

    #[test]
    fn test_logits_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DistilBertClassifier::load(vb, &tiny_distilbert_config(), 4)?;

        let (ids, mask) = batch(&device)?;
        let logits = model.forward_t(&ids, &mask, false)?;
        assert_eq!(logits.dims(), &[2, 4]);
        assert_eq!(model.family(), ModelFamily::DistilBert);

        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("pre_classifier.weight"));
        assert!(data.contains_key("distilbert.transformer.layer.0.attention.q_lin.weight"));
        assert!(data.contains_key("distilbert.transformer.layer.0.ffn.lin2.bias"));
        assert!(data.contains_key("distilbert.embeddings.LayerNorm.weight"));
        Ok(())
    }

    #[test]
    fn test_half_precision_forward() -> Result<()> {
        let device = Device::Cpu;
        for dtype in [DType::F16, DType::BF16] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
            let model = DistilBertClassifier::load(vb, &tiny_distilbert_config(), 2)?;

            let (ids, mask) = batch(&device)?;
            let logits = model.forward_t(&ids, &mask, true)?;
            assert_eq!(logits.dtype(), dtype);
            let values = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
            assert!(values.iter().all(|v| v.is_finite()));
        }
        Ok(())
    }

    #[test]
    fn test_gradients_reach_embeddings() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DistilBertClassifier::load(vb, &tiny_distilbert_config(), 2)?;

        let (ids, mask) = batch(&device)?;
        let grads = model.forward_t(&ids, &mask, true)?.sum_all()?.backward()?;
        let data = varmap.data().lock().unwrap();
        let embeddings = &data["distilbert.embeddings.word_embeddings.weight"];
        assert!(grads.get(embeddings.as_tensor()).is_some());
        Ok(())
    }
}
