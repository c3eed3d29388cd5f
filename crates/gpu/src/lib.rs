//! Slick GPU backend
//!
//! Runs the fluid pipeline of the `sim` crate as wgpu compute passes:
//! - Three-pass prefix sum and a stable counting sort
//! - Spatial hash rebuilt every step from predicted positions
//! - Particle arena that grows without losing live particles
//! - Removal readback, attribution and compaction on the host
//!
//! Everything runs headless; rendering is left to the embedding application.

pub mod context;
pub mod counting_sort;
pub mod obstacles;
pub mod params;
pub mod particle_store;
pub mod pipeline_builder;
pub mod population;
pub mod prefix_sum;
pub mod readback;
pub mod shaders;
pub mod simulation;
pub mod spatial_hash;
pub mod stepper;

pub use context::{DeviceHealth, GpuContext};
pub use simulation::FluidSimulation;

#[derive(Debug)]
pub enum GpuError {
    DeviceLost,
    BufferMapFailed(wgpu::BufferAsyncError),
    ChannelDisconnected,
    NoAdapter,
    RequestDevice(wgpu::RequestDeviceError),
    /// Shader or pipeline rejected by the device.
    ShaderCompilation { label: String, message: String },
    Config(sim::ConfigError),
    /// Error reported by the device outside any error scope.
    Uncaptured(String),
    /// Removal readback failed this many steps in a row.
    ReadbackStalled { faults: u32 },
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::DeviceLost => write!(f, "GPU device lost"),
            GpuError::BufferMapFailed(e) => write!(f, "Buffer map failed: {:?}", e),
            GpuError::ChannelDisconnected => write!(f, "Channel disconnected"),
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter"),
            GpuError::RequestDevice(e) => write!(f, "Device request failed: {}", e),
            GpuError::ShaderCompilation { label, message } => {
                write!(f, "Pipeline '{}' failed to compile: {}", label, message)
            }
            GpuError::Config(e) => write!(f, "{}", e),
            GpuError::Uncaptured(message) => write!(f, "GPU error: {}", message),
            GpuError::ReadbackStalled { faults } => {
                write!(f, "Removal readback failed {} steps in a row", faults)
            }
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::RequestDevice(e) => Some(e),
            GpuError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sim::ConfigError> for GpuError {
    fn from(e: sim::ConfigError) -> Self {
        GpuError::Config(e)
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::RequestDevice(e)
    }
}

impl From<wgpu::BufferAsyncError> for GpuError {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        GpuError::BufferMapFailed(e)
    }
}

/// Workgroup size shared by every per-element pass.
pub const WORKGROUP_SIZE: u32 = 256;

pub(crate) fn workgroups(n: u32) -> u32 {
    n.div_ceil(WORKGROUP_SIZE)
}
