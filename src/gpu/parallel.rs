use candle_core::backprop::GradStore;
use candle_core::Var;

use crate::error::Result;
use crate::processing::Sampler;

/// How a training run is spread over devices and processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    Single,
    /// Several GPUs driven by one process. The replicas' averaged gradient
    /// equals the gradient of one large batch, so the batch is scaled by the
    /// GPU count and run on the primary device.
    DataParallel { num_gpus: usize },
    /// One process per rank, each on its own shard of the data
    Distributed { rank: usize, world_size: usize },
}

impl ParallelMode {
    pub fn resolve(num_gpus: usize, local_rank: Option<usize>, world_size: usize) -> Self {
        match local_rank {
            Some(rank) => ParallelMode::Distributed { rank, world_size },
            None if num_gpus > 1 => ParallelMode::DataParallel { num_gpus },
            None => ParallelMode::Single,
        }
    }

    /// Factor applied to the per-device batch size
    pub fn batch_multiplier(&self) -> usize {
        match self {
            ParallelMode::DataParallel { num_gpus } => *num_gpus,
            _ => 1,
        }
    }

    pub fn world_size(&self) -> usize {
        match self {
            ParallelMode::Distributed { world_size, .. } => *world_size,
            _ => 1,
        }
    }

    /// Only rank 0 reports progress
    pub fn is_primary(&self) -> bool {
        match self {
            ParallelMode::Distributed { rank, .. } => *rank == 0,
            _ => true,
        }
    }

    /// Training sampler: a shuffled permutation, sharded across ranks when distributed
    pub fn train_sampler(&self, seed: u64) -> Sampler {
        match self {
            ParallelMode::Distributed { rank, world_size } => Sampler::Distributed {
                rank: *rank,
                world_size: *world_size,
                seed,
                shuffle: true,
            },
            _ => Sampler::Random { seed },
        }
    }
}

/// Gradient exchange between distributed processes.
///
/// Called once per optimizer step, before clipping, with the accumulated
/// gradients of this process.
pub trait GradientSync: Send + Sync {
    fn world_size(&self) -> usize;

    /// Replace every gradient in `grads` with its mean over all processes
    fn all_reduce_mean(&self, grads: &mut GradStore, vars: &[Var]) -> Result<()>;
}

/// Single-process stand-in: the local gradients already are the mean
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSync;

impl GradientSync for LocalSync {
    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_mean(&self, _grads: &mut GradStore, _vars: &[Var]) -> Result<()> {
        Ok(())
    }
}
