//! Device-resident particle arena.
//!
//! Buffers are sized for `capacity` particles of which the first `live` are
//! active. Growth doubles the capacity (capped at `max_particles`) and copies
//! the live prefix on the GPU, so existing particles keep their slot and
//! state. Compaction rewrites the live prefix in place; capacity never
//! shrinks. Every reallocation bumps `generation` so holders of bind groups
//! know to rebuild them.

use bytemuck::Pod;
use glam::Vec2;
use sim::particle::{Attribution, NewParticle, ParticleArrays};
use sim::population::clamp_spawn;

use crate::pipeline_builder::storage_buffer;
use crate::readback::read_buffer;
use crate::GpuError;

const VEC2_SIZE: u64 = std::mem::size_of::<Vec2>() as u64;
const SCALAR_SIZE: u64 = 4;
const ATTRIBUTION_SIZE: u64 = std::mem::size_of::<Attribution>() as u64;

pub struct ParticleStore {
    capacity: u32,
    live: u32,
    max_particles: u32,
    generation: u64,

    pub positions: wgpu::Buffer,
    pub predicted: wgpu::Buffer,
    pub velocities: wgpu::Buffer,
    /// (density, near density)
    pub densities: wgpu::Buffer,
    pub gravity_scales: wgpu::Buffer,
    pub species: wgpu::Buffer,
    pub attribution: wgpu::Buffer,
    pub removal: wgpu::Buffer,

    // Spatial-hash ordered scratch, not preserved across growth
    pub sorted_positions: wgpu::Buffer,
    pub sorted_velocities: wgpu::Buffer,
    pub sorted_velocities_out: wgpu::Buffer,
    pub sorted_densities: wgpu::Buffer,
    pub sorted_species: wgpu::Buffer,
}

/// The eight persistent per-particle arrays with their element size.
macro_rules! persistent_buffers {
    ($store:expr) => {
        [
            (&$store.positions, VEC2_SIZE),
            (&$store.predicted, VEC2_SIZE),
            (&$store.velocities, VEC2_SIZE),
            (&$store.densities, VEC2_SIZE),
            (&$store.gravity_scales, SCALAR_SIZE),
            (&$store.species, SCALAR_SIZE),
            (&$store.attribution, ATTRIBUTION_SIZE),
            (&$store.removal, SCALAR_SIZE),
        ]
    };
}

impl ParticleStore {
    pub fn new(device: &wgpu::Device, initial_capacity: u32, max_particles: u32) -> Self {
        let max_particles = max_particles.max(1);
        let capacity = initial_capacity.clamp(1, max_particles);
        log::info!(
            "Particle store: capacity {} (max {})",
            capacity,
            max_particles
        );
        Self::allocate(device, capacity, max_particles, 0)
    }

    fn allocate(device: &wgpu::Device, capacity: u32, max_particles: u32, generation: u64) -> Self {
        let n = capacity as u64;
        Self {
            capacity,
            live: 0,
            max_particles,
            generation,
            positions: storage_buffer(device, "Particle Positions", n * VEC2_SIZE),
            predicted: storage_buffer(device, "Particle Predicted", n * VEC2_SIZE),
            velocities: storage_buffer(device, "Particle Velocities", n * VEC2_SIZE),
            densities: storage_buffer(device, "Particle Densities", n * VEC2_SIZE),
            gravity_scales: storage_buffer(device, "Particle Gravity Scales", n * SCALAR_SIZE),
            species: storage_buffer(device, "Particle Species", n * SCALAR_SIZE),
            attribution: storage_buffer(device, "Particle Attribution", n * ATTRIBUTION_SIZE),
            removal: storage_buffer(device, "Particle Removal", n * SCALAR_SIZE),
            sorted_positions: storage_buffer(device, "Sorted Positions", n * VEC2_SIZE),
            sorted_velocities: storage_buffer(device, "Sorted Velocities", n * VEC2_SIZE),
            sorted_velocities_out: storage_buffer(device, "Sorted Velocities Out", n * VEC2_SIZE),
            sorted_densities: storage_buffer(device, "Sorted Densities", n * VEC2_SIZE),
            sorted_species: storage_buffer(device, "Sorted Species", n * SCALAR_SIZE),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn max_particles(&self) -> u32 {
        self.max_particles
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Grow until `required` particles fit. Returns true when the buffers
    /// were replaced. `required` above `max_particles` is clamped.
    pub fn ensure_capacity(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, required: u32) -> bool {
        let required = required.min(self.max_particles);
        if required <= self.capacity {
            return false;
        }
        let mut capacity = self.capacity.max(1);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }
        let capacity = capacity.min(self.max_particles);

        let mut grown = Self::allocate(device, capacity, self.max_particles, self.generation + 1);
        grown.live = self.live;
        if self.live > 0 {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Particle Growth Encoder"),
            });
            for ((src, size), (dst, _)) in persistent_buffers!(self)
                .into_iter()
                .zip(persistent_buffers!(grown))
            {
                encoder.copy_buffer_to_buffer(src, 0, dst, 0, self.live as u64 * size);
            }
            queue.submit(Some(encoder.finish()));
        }

        log::info!(
            "Particle store grew {} -> {} ({} live)",
            self.capacity,
            capacity,
            self.live
        );
        *self = grown;
        true
    }

    /// Append particles after the live prefix, growing as needed. Particles
    /// beyond `max_particles` are dropped. Returns how many were added.
    pub fn append(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, new: &[NewParticle]) -> usize {
        let count = clamp_spawn(self.live as usize, new.len(), self.max_particles as usize);
        if count == 0 {
            return 0;
        }
        self.ensure_capacity(device, queue, self.live + count as u32);
        let arrays = ParticleArrays::from_new(&new[..count]);
        self.write_arrays(queue, self.live, &arrays);
        self.live += count as u32;
        count
    }

    /// Replace the live prefix with `arrays`, e.g. after host compaction.
    /// The caller must have grown the store to fit.
    pub fn replace_live(&mut self, queue: &wgpu::Queue, arrays: &ParticleArrays) {
        let len = (arrays.len() as u32).min(self.capacity);
        if (arrays.len() as u32) > self.capacity {
            log::warn!(
                "Replacement of {} particles truncated to capacity {}",
                arrays.len(),
                self.capacity
            );
        }
        self.write_arrays(queue, 0, arrays);
        self.live = len;
    }

    /// Drop every particle. Capacity is kept.
    pub fn clear(&mut self) {
        self.live = 0;
    }

    fn write_arrays(&self, queue: &wgpu::Queue, start: u32, arrays: &ParticleArrays) {
        let room = self.capacity.saturating_sub(start) as usize;
        let n = arrays.len().min(room);
        if n == 0 {
            return;
        }
        write_slice(queue, &self.positions, start, VEC2_SIZE, &arrays.positions[..n]);
        write_slice(queue, &self.predicted, start, VEC2_SIZE, &arrays.predicted[..n]);
        write_slice(queue, &self.velocities, start, VEC2_SIZE, &arrays.velocities[..n]);
        write_slice(queue, &self.densities, start, VEC2_SIZE, &arrays.densities[..n]);
        write_slice(queue, &self.gravity_scales, start, SCALAR_SIZE, &arrays.gravity_scales[..n]);
        write_slice(queue, &self.species, start, SCALAR_SIZE, &arrays.species[..n]);
        write_slice(queue, &self.attribution, start, ATTRIBUTION_SIZE, &arrays.attribution[..n]);
        write_slice(queue, &self.removal, start, SCALAR_SIZE, &arrays.removal[..n]);
    }

    /// Blocking copy of the live particles back to the host.
    pub fn read_live(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<ParticleArrays, GpuError> {
        let n = self.live as usize;
        Ok(ParticleArrays {
            positions: read_buffer(device, queue, &self.positions, n)?,
            predicted: read_buffer(device, queue, &self.predicted, n)?,
            velocities: read_buffer(device, queue, &self.velocities, n)?,
            densities: read_buffer(device, queue, &self.densities, n)?,
            gravity_scales: read_buffer(device, queue, &self.gravity_scales, n)?,
            species: read_buffer(device, queue, &self.species, n)?,
            attribution: read_buffer(device, queue, &self.attribution, n)?,
            removal: read_buffer(device, queue, &self.removal, n)?,
        })
    }
}

fn write_slice<T: Pod>(queue: &wgpu::Queue, buffer: &wgpu::Buffer, start: u32, size: u64, data: &[T]) {
    queue.write_buffer(buffer, start as u64 * size, bytemuck::cast_slice(data));
}
