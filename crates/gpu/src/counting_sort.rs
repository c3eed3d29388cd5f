//! Stable GPU counting sort of (item, key) pairs.
//!
//! Keys are sorted 4 bits at a time, least significant digit first. Each
//! digit pass is a counting sort with no atomics:
//! 1. Count digits per 256-element block into digit-major block counts
//! 2. Exclusive prefix sum of the block counts gives every (digit, block)
//!    its output offset
//! 3. Scatter each element to its offset plus its rank among same-digit
//!    elements earlier in its block, then copy scratch back over the inputs
//!
//! Only as many digits as `max_key` needs are sorted, so keys below 16 cost
//! one pass and particle indices below 65536 cost four.

use crate::params::SortParams;
use crate::pipeline_builder::{bind_buffers, storage_buffer, uniform_buffer, PipelineBuilder};
use crate::prefix_sum::GpuPrefixSum;
use crate::{shaders, workgroups, GpuError};

/// Bits sorted per digit pass.
pub const RADIX_BITS: u32 = 4;
/// Buckets per digit pass.
pub const RADIX: u32 = 1 << RADIX_BITS;
const MAX_PASSES: usize = (u32::BITS / RADIX_BITS) as usize;

/// Digit passes needed to sort keys in `0..=max_key`.
pub fn digit_passes(max_key: u32) -> u32 {
    let bits = u32::BITS - max_key.leading_zeros();
    bits.div_ceil(RADIX_BITS).max(1)
}

pub struct GpuCountingSort {
    capacity: u32,
    // Queue writes land before the whole submit, so each digit pass reads
    // its own uniform.
    params_buffers: Vec<wgpu::Buffer>,
    block_counts: wgpu::Buffer,
    tmp_keys: wgpu::Buffer,
    tmp_items: wgpu::Buffer,
    prefix: GpuPrefixSum,
    count_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bind_groups: Vec<wgpu::BindGroup>,
}

impl GpuCountingSort {
    /// Sorter for up to `capacity` elements. Keys may be any u32.
    pub fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, GpuError> {
        let capacity = capacity.max(1);
        let params_size = std::mem::size_of::<SortParams>() as u64;
        let builder = |entry: &'static str| {
            PipelineBuilder::new(device)
                .shader_source(shaders::COUNTING_SORT)
                .label(entry)
                .entry_point(entry)
        };
        let (count_pipeline, layout) = builder("count_digits")
            .uniform_buffer_size(params_size)
            .storage_buffers(&[true, false, true, false, false])
            .build()?;
        let scatter_pipeline = builder("scatter_digits").build_with_layout(&layout)?;

        let count_slots = RADIX * workgroups(capacity);
        let block_counts = storage_buffer(device, "Sort Block Counts", count_slots as u64 * 4);
        let mut prefix = GpuPrefixSum::new(device, count_slots)?;
        prefix.bind(device, &block_counts);

        let bytes = capacity as u64 * 4;
        Ok(Self {
            capacity,
            params_buffers: (0..MAX_PASSES)
                .map(|_| uniform_buffer(device, "Sort Params", params_size))
                .collect(),
            block_counts,
            tmp_keys: storage_buffer(device, "Sort Scratch Keys", bytes),
            tmp_items: storage_buffer(device, "Sort Scratch Items", bytes),
            prefix,
            count_pipeline,
            scatter_pipeline,
            layout,
            bind_groups: Vec::new(),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bind the arrays to sort. Both must hold at least `capacity` u32s.
    pub fn bind(&mut self, device: &wgpu::Device, items: &wgpu::Buffer, keys: &wgpu::Buffer) {
        self.bind_groups = self
            .params_buffers
            .iter()
            .map(|params| {
                bind_buffers(
                    device,
                    "Counting Sort Bind Group",
                    &self.layout,
                    &[
                        params,
                        keys,
                        &self.block_counts,
                        items,
                        &self.tmp_keys,
                        &self.tmp_items,
                    ],
                )
            })
            .collect();
    }

    /// Write the per-run uniforms. Returns the clamped `(num_to_sort,
    /// max_key)` that [`GpuCountingSort::encode`] must be given.
    pub fn prepare(&self, queue: &wgpu::Queue, num_to_sort: u32, max_key: u32) -> (u32, u32) {
        let num_to_sort = num_to_sort.min(self.capacity);
        let num_blocks = workgroups(num_to_sort).max(1);
        for (pass, params_buffer) in self
            .params_buffers
            .iter()
            .enumerate()
            .take(digit_passes(max_key) as usize)
        {
            let params = SortParams {
                num_to_sort,
                shift: pass as u32 * RADIX_BITS,
                num_blocks,
                ..Default::default()
            };
            queue.write_buffer(params_buffer, 0, bytemuck::bytes_of(&params));
        }
        self.prefix.prepare(queue, RADIX * num_blocks);
        (num_to_sort, max_key)
    }

    /// Encode the sort of the first `num_to_sort` pairs. A no-op for zero
    /// elements.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        items: &wgpu::Buffer,
        keys: &wgpu::Buffer,
        num_to_sort: u32,
        max_key: u32,
    ) {
        if self.bind_groups.is_empty() {
            log::warn!("Counting sort encoded before buffers were bound");
            return;
        }
        if num_to_sort == 0 {
            return;
        }
        let num_blocks = workgroups(num_to_sort);
        let bytes = num_to_sort as u64 * 4;

        for bind_group in self.bind_groups.iter().take(digit_passes(max_key) as usize) {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Sort Count Digits"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.count_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(num_blocks, 1, 1);
            }

            self.prefix.encode(encoder, RADIX * num_blocks);

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Sort Scatter Digits"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.scatter_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(num_blocks, 1, 1);
            }

            encoder.copy_buffer_to_buffer(&self.tmp_keys, 0, keys, 0, bytes);
            encoder.copy_buffer_to_buffer(&self.tmp_items, 0, items, 0, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_passes_cover_max_key() {
        assert_eq!(digit_passes(0), 1);
        assert_eq!(digit_passes(15), 1);
        assert_eq!(digit_passes(16), 2);
        assert_eq!(digit_passes(4_095), 3);
        assert_eq!(digit_passes(65_535), 4);
        assert_eq!(digit_passes(65_536), 5);
        assert_eq!(digit_passes(u32::MAX), MAX_PASSES as u32);
    }
}
