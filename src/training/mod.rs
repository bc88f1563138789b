//! Fine-tuning: optimizer groups, learning rate schedule, gradient handling
//! and the training loop driving them

mod gradients;
mod optimizer;
mod precision;
mod schedule;
mod trainer;

pub use gradients::{clip_grad_norm, grad_norm, GradientAccumulator};
pub use optimizer::{is_no_decay, GroupedAdamW, ParamGroups};
pub use precision::{ensure_mixed_precision, LossScaler, MasterWeights};
pub use schedule::WarmupLinearSchedule;
pub use trainer::Trainer;
