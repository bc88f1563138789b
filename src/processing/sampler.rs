use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Order in which dataset indices are visited during an epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sampler {
    /// Dataset order, used for inference
    Sequential,
    /// Fresh permutation each epoch
    Random { seed: u64 },
    /// Each rank sees a disjoint, equally sized share of a shared permutation
    Distributed {
        rank: usize,
        world_size: usize,
        seed: u64,
        shuffle: bool,
    },
}

impl Sampler {
    /// Number of indices produced per epoch for a dataset of `len` examples
    pub fn num_samples(&self, len: usize) -> usize {
        match self {
            Sampler::Sequential | Sampler::Random { .. } => len,
            Sampler::Distributed { world_size, .. } => len.div_ceil(*world_size),
        }
    }

    pub fn indices(&self, len: usize, epoch: usize) -> Vec<usize> {
        match self {
            Sampler::Sequential => (0..len).collect(),
            Sampler::Random { seed } => {
                let mut indices: Vec<usize> = (0..len).collect();
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
                indices.shuffle(&mut rng);
                indices
            }
            Sampler::Distributed {
                rank,
                world_size,
                seed,
                shuffle,
            } => {
                if len == 0 {
                    return Vec::new();
                }
                let mut indices: Vec<usize> = (0..len).collect();
                if *shuffle {
                    // same seed on every rank so the shards partition one permutation
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
                    indices.shuffle(&mut rng);
                }
                // wrap around so every rank gets the same number of samples
                let total = self.num_samples(len) * world_size;
                let mut i = 0;
                while indices.len() < total {
                    indices.push(indices[i % len]);
                    i += 1;
                }
                indices
                    .into_iter()
                    .skip(*rank)
                    .step_by(*world_size)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_order() {
        assert_eq!(Sampler::Sequential.indices(4, 3), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_random_is_a_permutation_and_reproducible() {
        let sampler = Sampler::Random { seed: 42 };
        let a = sampler.indices(50, 0);
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_eq!(a, sampler.indices(50, 0));
        assert_ne!(a, sampler.indices(50, 1));
    }

    #[test]
    fn test_distributed_shards_cover_dataset() {
        let world_size = 3;
        let len = 10;
        let mut seen = HashSet::new();
        for rank in 0..world_size {
            let sampler = Sampler::Distributed {
                rank,
                world_size,
                seed: 7,
                shuffle: true,
            };
            let shard = sampler.indices(len, 2);
            assert_eq!(shard.len(), 4);
            assert_eq!(sampler.num_samples(len), 4);
            seen.extend(shard);
        }
        assert_eq!(seen.len(), len);
    }

    #[test]
    fn test_distributed_without_shuffle_strides() {
        let sampler = Sampler::Distributed {
            rank: 1,
            world_size: 2,
            seed: 0,
            shuffle: false,
        };
        assert_eq!(sampler.indices(5, 0), vec![1, 3, 0]);
        assert!(sampler.indices(0, 0).is_empty());
    }
}
