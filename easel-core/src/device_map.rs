use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl DeviceMap {
    pub fn from_flags(cpu: bool, ordinal: usize) -> Self {
        if cpu {
            Self::ForceCpu
        } else {
            Self::Ordinal(ordinal)
        }
    }
}

/// Numeric precision a pipeline's weights are loaded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    /// F16, used on accelerated devices.
    Half,
    /// F32, used on the CPU.
    Full,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::Half => DType::F16,
            Self::Full => DType::F32,
        }
    }
}

/// The device and precision a pipeline is loaded for.
#[derive(Clone, Debug)]
pub struct ComputeTarget {
    pub device: Device,
    pub precision: Precision,
}

impl ComputeTarget {
    /// Resolves `device_map` to a device: the requested CUDA or Metal ordinal
    /// when that backend is compiled in and present, the CPU otherwise. Half
    /// precision on accelerators, full precision on the CPU.
    pub fn select(device_map: DeviceMap) -> Result<Self> {
        let device = match device_map {
            DeviceMap::ForceCpu => Device::Cpu,
            DeviceMap::Ordinal(ordinal) if cuda_is_available() => Device::new_cuda(ordinal)?,
            DeviceMap::Ordinal(ordinal) if metal_is_available() => Device::new_metal(ordinal)?,
            DeviceMap::Ordinal(ordinal) => {
                tracing::warn!(
                    "No accelerator for ordinal {ordinal} (build with `--features {}`), running on CPU",
                    ACCELERATOR_FEATURE
                );
                Device::Cpu
            }
        };
        Ok(Self::for_device(device))
    }

    fn for_device(device: Device) -> Self {
        let precision = if device.is_cpu() {
            Precision::Full
        } else {
            Precision::Half
        };
        Self { device, precision }
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
const ACCELERATOR_FEATURE: &str = "metal";
#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
const ACCELERATOR_FEATURE: &str = "cuda";
