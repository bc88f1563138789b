//! Text preprocessing and mini-batch loading

mod dataset;
mod preprocess;
mod sampler;

pub use dataset::{Batch, Batches, DataLoader, ModelInputs};
pub use preprocess::{clamp_max_len, Processor};
pub use sampler::Sampler;
