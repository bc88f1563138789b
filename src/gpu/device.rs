// Location: src/gpu/device.rs

use candle_core::Device;
use tracing::{debug, info};

use crate::error::{ClassifierError, Result};

// Upper bound on ordinals probed when counting devices
const MAX_PROBED_DEVICES: usize = 16;

/// Number of CUDA devices usable by this build
pub fn cuda_device_count() -> usize {
    if !candle_core::utils::cuda_is_available() {
        return 0;
    }
    (0..MAX_PROBED_DEVICES)
        .take_while(|&i| Device::new_cuda(i).is_ok())
        .count()
}

/// Pick the execution device and the number of GPUs in play.
///
/// Without a rank the first CUDA device is used when one exists and the GPU
/// count is clamped to what is installed (`None` means all of them). With a
/// rank the process is pinned to that ordinal and drives a single GPU; on a
/// CPU-only build it falls back to the CPU.
pub fn select_device(num_gpus: Option<usize>, local_rank: Option<usize>) -> Result<(Device, usize)> {
    let available = cuda_device_count();

    match local_rank {
        None => {
            let num_gpus = num_gpus.map(|n| n.min(available)).unwrap_or(available);
            let device = if num_gpus > 0 {
                Device::new_cuda(0).map_err(|e| ClassifierError::DeviceError {
                    message: format!("Failed to open CUDA device 0: {}", e),
                })?
            } else {
                Device::Cpu
            };
            debug!(num_gpus, available, "Selected device");
            Ok((device, num_gpus))
        }
        Some(rank) => {
            let device = Device::cuda_if_available(rank).map_err(|e| ClassifierError::DeviceError {
                message: format!("Failed to open CUDA device {}: {}", rank, e),
            })?;
            let num_gpus = usize::from(device.is_cuda());
            info!(rank, cuda = device.is_cuda(), "Pinned process to device");
            Ok((device, num_gpus))
        }
    }
}
