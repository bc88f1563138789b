//! Encoder building blocks shared by the BERT and DistilBERT classifiers.
//!
//! Every op here follows the dtype of its input, so the same weights run in
//! f32, f16 or bf16, and every op is differentiable so gradients reach the
//! embeddings during fine-tuning.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{Dropout, Init, VarBuilder};
use candle_transformers::models::with_tracing::Linear;

// Added to attention scores at padding positions; representable in f16
const MASK_VALUE: f64 = -10_000.0;

/// LayerNorm that normalizes in f32 whatever the activation dtype
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(size, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let dtype = xs.dtype();
        let xs = xs.to_dtype(DType::F32)?;
        let centered = xs.broadcast_sub(&xs.mean_keepdim(D::Minus1)?)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        normed
            .to_dtype(dtype)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Turn a `(batch, seq_len)` 1/0 attention mask into the additive
/// `(batch, 1, 1, seq_len)` bias applied to attention scores
pub fn additive_mask(attention_mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (batch, seq_len) = attention_mask.dims2()?;
    // 1 -> 0, 0 -> MASK_VALUE
    attention_mask
        .to_dtype(dtype)?
        .affine(-MASK_VALUE, MASK_VALUE)?
        .reshape((batch, 1, 1, seq_len))
}

/// Multi-head scaled dot-product self-attention without the output projection
#[derive(Debug, Clone)]
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
    dropout: Dropout,
}

impl SelfAttention {
    /// `names` are the query, key and value projection names under `vb`
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        dropout: f64,
        names: [&str; 3],
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            candle_core::bail!(
                "hidden size {} is not a multiple of the number of attention heads {}",
                hidden_size,
                num_heads
            );
        }
        let [q, k, v] = names;
        Ok(Self {
            query: linear(hidden_size, hidden_size, vb.pp(q))?,
            key: linear(hidden_size, hidden_size, vb.pp(k))?,
            value: linear(hidden_size, hidden_size, vb.pp(v))?,
            num_heads,
            head_dim: hidden_size / num_heads,
            dropout: Dropout::new(dropout as f32),
        })
    }

    /// `xs` is `(batch, seq_len, hidden)`, `mask` comes from [`additive_mask`]
    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let heads = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = heads(self.query.forward(xs)?)?;
        let k = heads(self.key.forward(xs)?)?;
        let v = heads(self.value.forward(xs)?)?;

        let scores = q
            .matmul(&k.t()?)?
            .affine(1.0 / (self.head_dim as f64).sqrt(), 0.0)?
            .broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = self.dropout.forward(&probs, train)?;

        probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden))
    }
}

pub fn linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    candle_transformers::models::with_tracing::linear(in_dim, out_dim, vb)
}
