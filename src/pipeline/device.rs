use candle_core::Device;

use crate::error::CtcError;

/// Compute device chosen once by the caller and handed to every component.
#[derive(Debug, Clone)]
pub struct ComputeContext {
    device: Device,
}

impl ComputeContext {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    /// Accepts `cpu`, `cuda`, `cuda:<ordinal>` and `metal`.
    pub fn from_name(name: &str) -> Result<Self, CtcError> {
        let name = name.trim().to_ascii_lowercase();
        let device = match name.as_str() {
            "cpu" => Device::Cpu,
            "cuda" => Device::new_cuda(0).map_err(|e| CtcError::runtime("CUDA init", e))?,
            "metal" => Device::new_metal(0).map_err(|e| CtcError::runtime("Metal init", e))?,
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => {
                    let ordinal: usize = ordinal.parse().map_err(|_| {
                        CtcError::invalid_input(format!("invalid CUDA ordinal in {other:?}"))
                    })?;
                    Device::new_cuda(ordinal).map_err(|e| CtcError::runtime("CUDA init", e))?
                }
                None => {
                    return Err(CtcError::invalid_input(format!(
                        "unknown device {other:?}; expected cpu, cuda, cuda:N or metal"
                    )))
                }
            },
        };
        tracing::info!(device = %name, "compute context selected");
        Ok(Self { device })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn label(&self) -> &'static str {
        if self.device.is_cuda() {
            "cuda"
        } else if self.device.is_metal() {
            "metal"
        } else {
            "cpu"
        }
    }
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::cpu()
    }
}
