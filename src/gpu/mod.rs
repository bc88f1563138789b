//! Device selection and data-parallel execution modes

mod device;
mod parallel;

pub use device::{cuda_device_count, select_device};
pub use parallel::{GradientSync, LocalSync, ParallelMode};
