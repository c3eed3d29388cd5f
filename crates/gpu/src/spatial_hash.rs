//! GPU spatial hash index.
//!
//! Same scheme as `sim::spatial_hash`: cells of one smoothing radius, cell
//! hashes folded into `num_particles` keys, keys sorted with the stable
//! counting sort and an offset table pointing at the first entry of each key.

use crate::counting_sort::GpuCountingSort;
use crate::params::HashParams;
use crate::pipeline_builder::{bind_buffers, storage_buffer, uniform_buffer, PipelineBuilder};
use crate::{shaders, workgroups, GpuError};

pub struct GpuSpatialHash {
    capacity: u32,
    params_buffer: wgpu::Buffer,
    /// Sorted keys after [`GpuSpatialHash::encode`].
    pub keys: wgpu::Buffer,
    /// Original particle index at each sorted position.
    pub items: wgpu::Buffer,
    pub offsets: wgpu::Buffer,
    sort: GpuCountingSort,
    keys_pipeline: wgpu::ComputePipeline,
    clear_pipeline: wgpu::ComputePipeline,
    offsets_pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
}

impl GpuSpatialHash {
    pub fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, GpuError> {
        let capacity = capacity.max(1);
        let params_size = std::mem::size_of::<HashParams>() as u64;
        let builder = |entry: &'static str| {
            PipelineBuilder::new(device)
                .shader_source(shaders::SPATIAL_HASH)
                .label(entry)
                .entry_point(entry)
        };
        let (keys_pipeline, layout) = builder("compute_keys")
            .uniform_buffer_size(params_size)
            .storage_buffer(true)
            .storage_buffers(&[false, false, false])
            .build()?;
        let clear_pipeline = builder("clear_offsets").build_with_layout(&layout)?;
        let offsets_pipeline = builder("compute_offsets").build_with_layout(&layout)?;

        let bytes = capacity as u64 * 4;
        let keys = storage_buffer(device, "Hash Keys", bytes);
        let items = storage_buffer(device, "Hash Items", bytes);
        let mut sort = GpuCountingSort::new(device, capacity)?;
        sort.bind(device, &items, &keys);

        log::debug!("Spatial hash allocated for {} particles", capacity);
        Ok(Self {
            capacity,
            params_buffer: uniform_buffer(device, "Hash Params", params_size),
            keys,
            items,
            offsets: storage_buffer(device, "Hash Offsets", bytes),
            sort,
            keys_pipeline,
            clear_pipeline,
            offsets_pipeline,
            layout,
            bind_group: None,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bind the hash positions (predicted positions in the stepper).
    pub fn bind(&mut self, device: &wgpu::Device, positions: &wgpu::Buffer) {
        self.bind_group = Some(bind_buffers(
            device,
            "Spatial Hash Bind Group",
            &self.layout,
            &[&self.params_buffer, positions, &self.keys, &self.items, &self.offsets],
        ));
    }

    /// Write uniforms for a rebuild over `num_particles` positions.
    pub fn prepare(&self, queue: &wgpu::Queue, num_particles: u32, cell_size: f32) -> u32 {
        let n = num_particles.min(self.capacity);
        let params = HashParams {
            num_particles: n,
            cell_size,
            ..Default::default()
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        if n > 0 {
            self.sort.prepare(queue, n, n - 1);
        }
        n
    }

    /// Encode keys, sort and offsets. `num_particles` is the value returned
    /// by [`GpuSpatialHash::prepare`].
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, num_particles: u32) {
        let Some(bind_group) = &self.bind_group else {
            log::warn!("Spatial hash encoded before positions were bound");
            return;
        };
        if num_particles == 0 {
            return;
        }
        let groups = workgroups(num_particles);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Hash Keys"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.keys_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        self.sort
            .encode(encoder, &self.items, &self.keys, num_particles, num_particles - 1);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Hash Offsets"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.clear_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
            pass.set_pipeline(&self.offsets_pipeline);
            pass.dispatch_workgroups(groups, 1, 1);
        }
    }
}
