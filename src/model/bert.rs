use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{embedding, Activation, Dropout, Embedding, VarBuilder};
use candle_transformers::models::with_tracing::Linear;
use serde::Deserialize;

use super::layers::{additive_mask, linear, LayerNorm, SelfAttention};
use super::{ModelFamily, SequenceClassification};

fn default_activation() -> Activation {
    Activation::Gelu
}

fn default_dropout() -> f64 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// The fields of a BERT `config.json` the classifier reads
#[derive(Debug, Clone, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_activation")]
    pub hidden_act: Activation,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub position_embedding_type: Option<String>,
    #[serde(default)]
    pub classifier_dropout: Option<f64>,
}

impl BertConfig {
    pub fn from_value(config: &serde_json::Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| candle_core::Error::Msg(format!("invalid BERT config: {}", e)))?;
        match parsed.position_embedding_type.as_deref() {
            None | Some("absolute") => Ok(parsed),
            Some(other) => candle_core::bail!("unsupported position_embedding_type '{}'", other),
        }
    }
}

struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_positions: usize,
}

impl BertEmbeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            word_embeddings: embedding(config.vocab_size, hidden, vb.pp("word_embeddings"))?,
            position_embeddings: embedding(
                config.max_position_embeddings,
                hidden,
                vb.pp("position_embeddings"),
            )?,
            token_type_embeddings: embedding(
                config.type_vocab_size,
                hidden,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: LayerNorm::new(hidden, config.layer_norm_eps, vb.pp("LayerNorm"))?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            max_positions: config.max_position_embeddings,
        })
    }

    fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {} exceeds max_position_embeddings {}",
                seq_len,
                self.max_positions
            );
        }
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        // single-segment inputs: every token type is 0
        let token_types = input_ids.zeros_like()?;

        let xs = (self.word_embeddings.forward(input_ids)?
            + self.token_type_embeddings.forward(&token_types)?)?
        .broadcast_add(&self.position_embeddings.forward(&positions)?)?;
        self.dropout.forward(&self.layer_norm.forward(&xs)?, train)
    }
}

struct BertLayer {
    attention: SelfAttention,
    attention_output: Linear,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    activation: Activation,
    dropout: Dropout,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        let eps = config.layer_norm_eps;
        Ok(Self {
            attention: SelfAttention::new(
                hidden,
                config.num_attention_heads,
                config.attention_probs_dropout_prob,
                ["query", "key", "value"],
                vb.pp("attention.self"),
            )?,
            attention_output: linear(hidden, hidden, vb.pp("attention.output.dense"))?,
            attention_norm: LayerNorm::new(hidden, eps, vb.pp("attention.output.LayerNorm"))?,
            intermediate: linear(hidden, config.intermediate_size, vb.pp("intermediate.dense"))?,
            output: linear(config.intermediate_size, hidden, vb.pp("output.dense"))?,
            output_norm: LayerNorm::new(hidden, eps, vb.pp("output.LayerNorm"))?,
            activation: config.hidden_act,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(xs, mask, train)?;
        let attended = self
            .dropout
            .forward(&self.attention_output.forward(&attended)?, train)?;
        let xs = self.attention_norm.forward(&(attended + xs)?)?;

        let hidden = self.activation.forward(&self.intermediate.forward(&xs)?)?;
        let hidden = self.dropout.forward(&self.output.forward(&hidden)?, train)?;
        self.output_norm.forward(&(hidden + xs)?)
    }
}

/// BERT encoder with the pooler + linear head used for sequence classification.
///
/// Parameter names follow the HuggingFace `BertForSequenceClassification`
/// layout (`bert.*`, `classifier.*`) so hub checkpoints load directly.
pub struct BertClassifier {
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
    pooler: Linear,
    dropout: Dropout,
    classifier: Linear,
}

impl BertClassifier {
    pub fn load(vb: VarBuilder, config: &serde_json::Value, num_labels: usize) -> Result<Self> {
        let config = BertConfig::from_value(config)?;
        let hidden = config.hidden_size;
        let classifier_dropout = config
            .classifier_dropout
            .unwrap_or(config.hidden_dropout_prob);

        let bert = vb.pp("bert");
        let embeddings = BertEmbeddings::load(bert.pp("embeddings"), &config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| BertLayer::load(bert.pp(format!("encoder.layer.{}", i)), &config))
            .collect::<Result<Vec<_>>>()?;
        let pooler = linear(hidden, hidden, bert.pp("pooler.dense"))?;
        let classifier = linear(hidden, num_labels, vb.pp("classifier"))?;

        Ok(Self {
            embeddings,
            layers,
            pooler,
            dropout: Dropout::new(classifier_dropout as f32),
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

impl SequenceClassification for BertClassifier {
    fn forward_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = self.embeddings.forward(input_ids, train)?;
        let mask = additive_mask(attention_mask, hidden.dtype())?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask, train)?;
        }
        // [CLS] position
        let pooled = self.pooler.forward(&hidden.i((.., 0))?)?.tanh()?;
        let pooled = self.dropout.forward(&pooled, train)?;
        self.classifier.forward(&pooled)
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Bert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_bert_config;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn batch(device: &Device) -> Result<(Tensor, Tensor)> {
        let ids = Tensor::new(&[[2u32, 5, 6, 3, 0], [2, 7, 3, 0, 0]], device)?;
        let mask = Tensor::new(&[[1u32, 1, 1, 1, 0], [1, 1, 1, 0, 0]], device)?;
        Ok((ids, mask))
    }

    #[test]
    fn test_logits_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = BertClassifier::load(vb, &tiny_bert_config(), 3)?;

        let (ids, mask) = batch(&device)?;
        let logits = model.forward_t(&ids, &mask, false)?;
        assert_eq!(logits.dims(), &[2, 3]);
        assert_eq!(model.family(), ModelFamily::Bert);
        Ok(())
    }

    #[test]
    fn test_parameter_names_follow_hub_layout() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BertClassifier::load(vb, &tiny_bert_config(), 2)?;

        let data = varmap.data().lock().unwrap();
        for name in [
            "bert.embeddings.word_embeddings.weight",
            "bert.embeddings.LayerNorm.weight",
            "bert.encoder.layer.0.attention.self.query.weight",
            "bert.encoder.layer.0.attention.output.LayerNorm.bias",
            "bert.encoder.layer.0.intermediate.dense.weight",
            "bert.encoder.layer.0.output.dense.bias",
            "bert.pooler.dense.weight",
            "classifier.bias",
        ] {
            assert!(data.contains_key(name), "missing {}", name);
        }
        assert_eq!(data["classifier.weight"].dims(), &[2, 8]);
        Ok(())
    }

    #[test]
    fn test_eval_forward_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = BertClassifier::load(vb, &tiny_bert_config(), 2)?;

        let ids = Tensor::new(&[[2u32, 9, 3, 0]], &device)?;
        let mask = Tensor::new(&[[1u32, 1, 1, 0]], &device)?;
        let a = model.forward_t(&ids, &mask, false)?.to_vec2::<f32>()?;
        let b = model.forward_t(&ids, &mask, false)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_half_precision_forward() -> Result<()> {
        let device = Device::Cpu;
        for dtype in [DType::F16, DType::BF16] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
            let model = BertClassifier::load(vb, &tiny_bert_config(), 2)?;

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
        let model = BertClassifier::load(vb, &tiny_bert_config(), 2)?;

        let (ids, mask) = batch(&device)?;
        let grads = model.forward_t(&ids, &mask, true)?.sum_all()?.backward()?;
        let data = varmap.data().lock().unwrap();
        for name in [
            "bert.embeddings.word_embeddings.weight",
            "bert.embeddings.LayerNorm.weight",
            "bert.encoder.layer.0.attention.self.query.weight",
        ] {
            assert!(grads.get(data[name].as_tensor()).is_some(), "no gradient for {}", name);
        }
        Ok(())
    }

    #[test]
    fn test_rejects_relative_positions() {
        let mut config = tiny_bert_config();
        config["position_embedding_type"] = "relative_key".into();
        assert!(BertConfig::from_value(&config).is_err());
    }
}
