use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::GpuError;

/// Fatal-fault flag of one device, shared by the context and every
/// simulation built on it. Once set, steps fail with
/// [`GpuError::DeviceLost`] instead of submitting more work.
#[derive(Clone, Debug, Default)]
pub struct DeviceHealth {
    lost: Arc<AtomicBool>,
}

impl DeviceHealth {
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), GpuError> {
        if self.is_lost() {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Log `error` and mark the device unusable.
    pub fn record_fatal(&self, error: &GpuError) {
        log::error!("{}; further steps are refused", error);
        self.lost.store(true, Ordering::Release);
    }
}

/// Device and queue shared by every GPU component.
///
/// Headless: no surface is created, the simulation only needs compute.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
    pub health: DeviceHealth,
}

impl GpuContext {
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        log::info!("Using GPU: {:?}", adapter_info);

        // The widest passes bind seven storage buffers
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffers_per_shader_stage: 8,
                        ..wgpu::Limits::downlevel_defaults()
                    }
                    .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let health = DeviceHealth::default();
        let observer = health.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            let fatal = matches!(error, wgpu::Error::OutOfMemory { .. });
            let error = GpuError::Uncaptured(error.to_string());
            if fatal {
                observer.record_fatal(&error);
            } else {
                log::error!("{}", error);
            }
        }));

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            health,
        })
    }

    /// Blocking variant for tests and the headless binary.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }
}
