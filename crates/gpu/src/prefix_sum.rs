//! GPU exclusive prefix sum.
//!
//! Blelloch scan over 512-element blocks (256 threads, two elements each),
//! then a single-thread scan of the block totals and a final pass adding each
//! block's offset. The data buffer is bound by the caller.

use crate::params::ScanParams;
use crate::pipeline_builder::{bind_buffers, storage_buffer, uniform_buffer, PipelineBuilder};
use crate::{shaders, GpuError, WORKGROUP_SIZE};

/// Elements scanned by one workgroup.
pub const BLOCK_SIZE: u32 = 512;

pub struct GpuPrefixSum {
    capacity: u32,
    params_buffer: wgpu::Buffer,
    block_sums: wgpu::Buffer,
    local_pipeline: wgpu::ComputePipeline,
    block_pipeline: wgpu::ComputePipeline,
    add_pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
}

impl GpuPrefixSum {
    /// Scanner for up to `capacity` elements.
    pub fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, GpuError> {
        let params_size = std::mem::size_of::<ScanParams>() as u64;
        let builder = |entry: &'static str| {
            PipelineBuilder::new(device)
                .shader_source(shaders::PREFIX_SUM)
                .label(entry)
                .entry_point(entry)
        };
        let (local_pipeline, layout) = builder("local_prefix_sum")
            .uniform_buffer_size(params_size)
            .storage_buffers(&[false, false])
            .build()?;
        let block_pipeline = builder("scan_block_sums").build_with_layout(&layout)?;
        let add_pipeline = builder("add_block_offsets").build_with_layout(&layout)?;

        let capacity = capacity.max(1);
        Ok(Self {
            capacity,
            params_buffer: uniform_buffer(device, "Prefix Sum Params", params_size),
            block_sums: storage_buffer(device, "Prefix Block Sums", block_count(capacity) as u64 * 4),
            local_pipeline,
            block_pipeline,
            add_pipeline,
            layout,
            bind_group: None,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bind the buffer to scan. Must hold at least `capacity` u32s.
    pub fn bind(&mut self, device: &wgpu::Device, data: &wgpu::Buffer) {
        self.bind_group = Some(bind_buffers(
            device,
            "Prefix Sum Bind Group",
            &self.layout,
            &[&self.params_buffer, data, &self.block_sums],
        ));
    }

    pub fn prepare(&self, queue: &wgpu::Queue, element_count: u32) {
        let params = ScanParams {
            element_count: element_count.min(self.capacity),
            ..Default::default()
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Encode the scan of the first `element_count` elements. Call
    /// [`GpuPrefixSum::prepare`] with the same count before submitting.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, element_count: u32) {
        let Some(bind_group) = &self.bind_group else {
            log::warn!("Prefix sum encoded before a buffer was bound");
            return;
        };
        let element_count = element_count.min(self.capacity);
        if element_count == 0 {
            return;
        }
        let blocks = block_count(element_count);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Local Prefix Sum"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.local_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(blocks, 1, 1);
        }

        if blocks > 1 {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Scan Block Sums"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.block_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(1, 1, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Add Block Offsets"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.add_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(element_count.div_ceil(WORKGROUP_SIZE), 1, 1);
            }
        }
    }
}

pub fn block_count(element_count: u32) -> u32 {
    element_count.div_ceil(BLOCK_SIZE).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0), 1);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(512), 1);
        assert_eq!(block_count(513), 2);
        assert_eq!(block_count(5000), 10);
    }
}
