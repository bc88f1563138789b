//! Engine module providing the main interface: load a registered model,
//! fine-tune it, predict with it and save it

mod builder;
mod classifier;
mod inference;
mod transformer;

pub use builder::ClassifierBuilder;
pub use classifier::SequenceClassifier;
pub use inference::{argmax, softmax, Predictions};
pub use transformer::{Transformer, FINE_TUNED_DIR};
