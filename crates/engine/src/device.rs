//! Compute device selection
//!
//! The device is chosen once at startup and never changes afterwards.

use crate::error::{NeuroPixelError, Result};
use candle_core::Device;
use neuropixel_common::config::DevicePreference;
use tracing::{info, warn};

/// Pick the device for the lifetime of the process
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::new_cuda(0).map_err(|e| {
            NeuroPixelError::model_unavailable(format!("CUDA device requested but unavailable: {}", e))
        })?,
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) => device,
            Err(e) => {
                warn!("CUDA probe failed, falling back to CPU: {}", e);
                Device::Cpu
            }
        },
    };

    info!("Using device: {}", device_name(&device));
    Ok(device)
}

/// Short human-readable device name
pub fn device_name(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_preference() {
        let device = select_device(DevicePreference::Cpu).unwrap();
        assert!(device.is_cpu());
        assert_eq!(device_name(&device), "cpu");
    }

    #[test]
    fn test_auto_always_yields_a_device() {
        let device = select_device(DevicePreference::Auto).unwrap();
        assert!(matches!(device_name(&device), "cpu" | "cuda"));
    }
}
