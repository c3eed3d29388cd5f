//! Obstacle and force-zone upload.
//!
//! Buffers are rewritten in place every frame and only reallocated when a
//! record count changes. Reallocation bumps `generation`.

use glam::Vec2;
use sim::ObstacleLayout;

use crate::params::{ForceZoneGpu, ObstacleGpu};
use crate::pipeline_builder::storage_buffer;

pub struct ObstacleUploader {
    pub obstacles: wgpu::Buffer,
    pub vertices: wgpu::Buffer,
    pub zones: wgpu::Buffer,
    counts: (usize, usize, usize),
    generation: u64,
    layout: ObstacleLayout,
}

impl ObstacleUploader {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            obstacles: storage_buffer(device, "Obstacles", 0),
            vertices: storage_buffer(device, "Obstacle Vertices", 0),
            zones: storage_buffer(device, "Force Zones", 0),
            counts: (0, 0, 0),
            generation: 0,
            layout: ObstacleLayout::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The layout most recently uploaded. Removal attribution resolves
    /// obstacle indices against it.
    pub fn layout(&self) -> &ObstacleLayout {
        &self.layout
    }

    pub fn obstacle_count(&self) -> u32 {
        self.layout.records.len() as u32
    }

    pub fn zone_count(&self) -> u32 {
        self.layout.zones.len() as u32
    }

    /// Upload a frame's layout. Returns true when buffers were reallocated.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layout: ObstacleLayout) -> bool {
        let records: Vec<ObstacleGpu> = layout.records.iter().map(ObstacleGpu::from).collect();
        let zones: Vec<ForceZoneGpu> = layout.zones.iter().map(ForceZoneGpu::from).collect();
        let counts = (records.len(), layout.vertices.len(), zones.len());

        let reallocated = counts != self.counts;
        if reallocated {
            let obstacle_size = std::mem::size_of::<ObstacleGpu>() as u64;
            let vertex_size = std::mem::size_of::<Vec2>() as u64;
            let zone_size = std::mem::size_of::<ForceZoneGpu>() as u64;
            self.obstacles = storage_buffer(device, "Obstacles", counts.0 as u64 * obstacle_size);
            self.vertices = storage_buffer(device, "Obstacle Vertices", counts.1 as u64 * vertex_size);
            self.zones = storage_buffer(device, "Force Zones", counts.2 as u64 * zone_size);
            self.counts = counts;
            self.generation += 1;
            log::debug!(
                "Obstacle buffers reallocated: {} obstacles, {} vertices, {} zones",
                counts.0,
                counts.1,
                counts.2
            );
        }

        if !records.is_empty() {
            queue.write_buffer(&self.obstacles, 0, bytemuck::cast_slice(&records));
        }
        if !layout.vertices.is_empty() {
            queue.write_buffer(&self.vertices, 0, bytemuck::cast_slice(&layout.vertices));
        }
        if !zones.is_empty() {
            queue.write_buffer(&self.zones, 0, bytemuck::cast_slice(&zones));
        }
        self.layout = layout;
        reallocated
    }
}
