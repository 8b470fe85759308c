use anyhow::Result;
use candle_core::Device;

#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;

/// Returns the number of visible CUDA devices.
/// Returns 0 if CUDA is not available or disabled.
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        match CudaDevice::count() {
            Ok(n) if n > 0 => n as usize,
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!("Failed to query CUDA device count: {:?}", e);
                0
            }
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}

/// Returns (free_memory, total_memory) in bytes for the specified device.
/// Returns (0, 0) if CUDA is not available or disabled.
pub fn get_vram_info(_device_id: usize) -> Result<(usize, usize)> {
    #[cfg(feature = "cuda")]
    {
        match CudaDevice::new(_device_id) {
            Ok(_dev) => {
                use cudarc::driver::result::mem_get_info;
                let (free, total) = mem_get_info()?;
                Ok((free, total))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize CUDA device {}: {:?}",
                    _device_id,
                    e
                );
                Ok((0, 0))
            }
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        Ok((0, 0))
    }
}

/// The ordered set of compute devices a run may use.
///
/// The first device is the primary one: parameters live there and
/// gathered outputs land there.
#[derive(Debug, Clone)]
pub struct DeviceTopology {
    devices: Vec<Device>,
}

impl DeviceTopology {
    /// Enumerates CUDA devices, falling back to a single CPU.
    pub fn detect() -> Result<Self> {
        let count = cuda_device_count();
        if count == 0 {
            return Ok(Self::cpu());
        }
        let devices = (0..count)
            .map(|ordinal| {
                let (free, total) = get_vram_info(ordinal)?;
                tracing::info!(
                    "cuda:{} {} / {} MiB free",
                    ordinal,
                    free / (1024 * 1024),
                    total / (1024 * 1024)
                );
                Ok(Device::new_cuda(ordinal)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { devices })
    }

    pub fn cpu() -> Self {
        Self {
            devices: vec![Device::Cpu],
        }
    }

    pub fn from_devices(devices: Vec<Device>) -> Result<Self> {
        if devices.is_empty() {
            anyhow::bail!("A device topology needs at least one device");
        }
        Ok(Self { devices })
    }

    pub fn primary(&self) -> &Device {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_multi_device(&self) -> bool {
        self.devices.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_topology_is_single_device() {
        let topology = DeviceTopology::cpu();
        assert_eq!(topology.count(), 1);
        assert!(!topology.is_multi_device());
        assert!(topology.primary().is_cpu());
    }

    #[test]
    fn test_empty_topology_rejected() {
        assert!(DeviceTopology::from_devices(Vec::new()).is_err());
        let topology = DeviceTopology::from_devices(vec![Device::Cpu, Device::Cpu]).unwrap();
        assert!(topology.is_multi_device());
    }
}
