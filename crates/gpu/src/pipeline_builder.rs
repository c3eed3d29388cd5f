//! Compute pipeline builder.
//!
//! Every pass in this crate binds one uniform followed by storage buffers in
//! binding order, so the builder only has to record the binding kinds:
//!
//! ```ignore
//! let (pipeline, layout) = PipelineBuilder::new(device)
//!     .shader_source(shaders::DENSITY)
//!     .label("density")
//!     .entry_point("compute_density")
//!     .uniform_buffer_size(std::mem::size_of::<SimParams>() as u64)
//!     .storage_buffers(&[true, true, true, false])
//!     .build()?;
//! ```
//!
//! Shader and pipeline creation run inside a validation error scope, so a
//! broken shader comes back as [`GpuError::ShaderCompilation`] instead of an
//! uncaptured device error.

use std::num::NonZeroU64;

use crate::GpuError;

pub struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    shader_source: Option<&'a str>,
    label: &'a str,
    entry_point: &'a str,
    bindings: Vec<BufferBinding>,
}

#[derive(Clone, Debug)]
enum BufferBinding {
    Uniform(Option<NonZeroU64>),
    Storage { read_only: bool },
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self {
            device,
            shader_source: None,
            label: "compute",
            entry_point: "main",
            bindings: Vec::new(),
        }
    }

    pub fn shader_source(mut self, source: &'a str) -> Self {
        self.shader_source = Some(source);
        self
    }

    pub fn label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }

    /// Entry point function name (default: "main").
    pub fn entry_point(mut self, entry_point: &'a str) -> Self {
        self.entry_point = entry_point;
        self
    }

    pub fn uniform_buffer(mut self, min_size: Option<NonZeroU64>) -> Self {
        self.bindings.push(BufferBinding::Uniform(min_size));
        self
    }

    pub fn uniform_buffer_size(self, size: u64) -> Self {
        self.uniform_buffer(NonZeroU64::new(size))
    }

    pub fn storage_buffer(mut self, read_only: bool) -> Self {
        self.bindings.push(BufferBinding::Storage { read_only });
        self
    }

    /// Each flag is one storage binding; `true` means read-only.
    pub fn storage_buffers(mut self, read_only_flags: &[bool]) -> Self {
        for &read_only in read_only_flags {
            self.bindings.push(BufferBinding::Storage { read_only });
        }
        self
    }

    pub fn build(self) -> Result<(wgpu::ComputePipeline, wgpu::BindGroupLayout), GpuError> {
        let label = self.label;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let entries: Vec<wgpu::BindGroupLayoutEntry> = self
            .bindings
            .iter()
            .enumerate()
            .map(|(binding, spec)| {
                let ty = match spec {
                    BufferBinding::Uniform(min_size) => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: *min_size,
                    },
                    BufferBinding::Storage { read_only } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage {
                            read_only: *read_only,
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                };
                wgpu::BindGroupLayoutEntry {
                    binding: binding as u32,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout_label = format!("{} Bind Group Layout", label);
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&layout_label),
                    entries: &entries,
                });

        let pipeline = self.create_pipeline(&bind_group_layout);
        self.finish(pipeline.map(|p| (p, bind_group_layout)))
    }

    /// Build another entry point against a layout from an earlier
    /// [`PipelineBuilder::build`], so one bind group serves every pass of a
    /// shader. Bindings added to this builder are ignored.
    pub fn build_with_layout(
        self,
        layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::ComputePipeline, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create_pipeline(layout);
        self.finish(pipeline)
    }

    fn create_pipeline(
        &self,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::ComputePipeline, GpuError> {
        let label = self.label;
        let shader_source = self.shader_source.ok_or_else(|| GpuError::ShaderCompilation {
            label: label.to_string(),
            message: "no shader source set".to_string(),
        })?;

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

        let pipeline_layout_label = format!("{} Pipeline Layout", label);
        let pipeline_layout =
            self.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&pipeline_layout_label),
                    bind_group_layouts: &[bind_group_layout],
                    push_constant_ranges: &[],
                });

        Ok(self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(self.entry_point),
            compilation_options: Default::default(),
            cache: None,
        }))
    }

    /// Pop the validation scope pushed by the build methods.
    fn finish<T>(&self, built: Result<T, GpuError>) -> Result<T, GpuError> {
        let scoped = pollster::block_on(self.device.pop_error_scope());
        let built = built?;
        if let Some(error) = scoped {
            log::error!("Pipeline '{}' rejected: {}", self.label, error);
            return Err(GpuError::ShaderCompilation {
                label: self.label.to_string(),
                message: error.to_string(),
            });
        }
        Ok(built)
    }
}

/// Bind `buffers` whole, at bindings `0..buffers.len()`.
pub fn bind_buffers(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Storage buffer of at least one 16-byte element so empty arrays still
/// bind.
pub fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(16),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

pub fn uniform_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
