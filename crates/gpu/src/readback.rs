//! GPU to host readback.
//!
//! [`RemovalReadback`] copies the removal flags, species and attribution of
//! the live particles into staging buffers at the end of a step, maps them
//! once the step is submitted, and hands the host a [`RemovalSnapshot`]. A
//! slot that is encoded or mapping refuses new work, so a readback is never
//! abandoned mid-flight when the population changes.

use std::sync::mpsc;

use bytemuck::Pod;
use sim::particle::Attribution;
use sim::population::scan_removals;
use sim::{ObstacleLayout, RemovalTally};

use crate::particle_store::ParticleStore;
use crate::context::DeviceHealth;
use crate::GpuError;

type MapReceiver = mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>;

/// A single staging buffer with async map tracking.
struct StagingBuffer {
    buffer: wgpu::Buffer,
    rx: Option<MapReceiver>,
    mapped: bool,
}

impl StagingBuffer {
    fn new(device: &wgpu::Device, label: &str, size: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size.max(16),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            rx: None,
            mapped: false,
        }
    }

    fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, src: &wgpu::Buffer, byte_size: u64) {
        encoder.copy_buffer_to_buffer(src, 0, &self.buffer, 0, byte_size);
    }

    fn start_map(&mut self) {
        let (tx, rx) = mpsc::channel();
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.rx = Some(rx);
    }

    /// Ok(true) once mapped, Ok(false) while pending.
    fn check_ready(&mut self) -> Result<bool, GpuError> {
        let Some(receiver) = &self.rx else {
            return Ok(self.mapped);
        };
        match receiver.try_recv() {
            Ok(Ok(())) => {
                self.rx = None;
                self.mapped = true;
                Ok(true)
            }
            Ok(Err(e)) => {
                self.rx = None;
                Err(e.into())
            }
            Err(mpsc::TryRecvError::Empty) => Ok(false),
            Err(mpsc::TryRecvError::Disconnected) => {
                self.rx = None;
                Err(GpuError::ChannelDisconnected)
            }
        }
    }

    fn read<T: Pod>(&self, count: usize) -> Vec<T> {
        let data = self.buffer.slice(..).get_mapped_range();
        let slice: &[T] = bytemuck::cast_slice(&data);
        slice[..count.min(slice.len())].to_vec()
    }

    fn unmap(&mut self) {
        if self.mapped {
            self.buffer.unmap();
            self.mapped = false;
        }
    }
}

/// Per-particle removal data of one step, in slot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemovalSnapshot {
    pub removal: Vec<u32>,
    pub species: Vec<u32>,
    pub attribution: Vec<Attribution>,
}

impl RemovalSnapshot {
    pub fn any_flagged(&self) -> bool {
        self.removal.iter().any(|&r| r != 0)
    }

    /// Count every flagged particle into `tally`, crediting the obstacle in
    /// its attribution record. Returns how many were flagged.
    pub fn tally_into(&self, layout: &ObstacleLayout, tally: &mut RemovalTally) -> usize {
        scan_removals(&self.removal, &self.species, &self.attribution, layout, tally)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Encoded,
    Mapping,
}

pub struct RemovalReadback {
    removal: StagingBuffer,
    species: StagingBuffer,
    attribution: StagingBuffer,
    capacity: u32,
    count: u32,
    state: SlotState,
}

impl RemovalReadback {
    pub fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let n = capacity as u64;
        Self {
            removal: StagingBuffer::new(device, "Readback Removal Staging", n * 4),
            species: StagingBuffer::new(device, "Readback Species Staging", n * 4),
            attribution: StagingBuffer::new(
                device,
                "Readback Attribution Staging",
                n * std::mem::size_of::<Attribution>() as u64,
            ),
            capacity,
            count: 0,
            state: SlotState::Idle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state != SlotState::Idle
    }

    /// Encode copies of the live particles' removal data. Returns false if a
    /// readback is already in flight or there are no particles.
    pub fn schedule(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        store: &ParticleStore,
    ) -> bool {
        if self.is_pending() || store.live() == 0 {
            return false;
        }
        if store.capacity() > self.capacity {
            *self = Self::new(device, store.capacity());
        }
        let count = store.live();
        let n = count as u64;
        self.removal.copy_from(encoder, &store.removal, n * 4);
        self.species.copy_from(encoder, &store.species, n * 4);
        self.attribution.copy_from(
            encoder,
            &store.attribution,
            n * std::mem::size_of::<Attribution>() as u64,
        );
        self.count = count;
        self.state = SlotState::Encoded;
        true
    }

    /// Start mapping. Call after the encoder passed to
    /// [`RemovalReadback::schedule`] has been submitted.
    pub fn start_map(&mut self) {
        if self.state != SlotState::Encoded {
            return;
        }
        self.removal.start_map();
        self.species.start_map();
        self.attribution.start_map();
        self.state = SlotState::Mapping;
    }

    /// Block until the scheduled readback resolves. `Ok(None)` when nothing
    /// was scheduled. On failure the slot is released and the error
    /// returned; the flags stay on the device.
    pub fn wait(
        &mut self,
        device: &wgpu::Device,
        health: &DeviceHealth,
    ) -> Result<Option<RemovalSnapshot>, GpuError> {
        match self.state {
            SlotState::Idle => return Ok(None),
            SlotState::Encoded => self.start_map(),
            SlotState::Mapping => {}
        }
        if let Err(e) = health.check() {
            self.release();
            return Err(e);
        }

        device.poll(wgpu::Maintain::Wait);
        let mut failure = None;
        for staging in [&mut self.removal, &mut self.species, &mut self.attribution] {
            match staging.check_ready() {
                Ok(true) => {}
                Ok(false) => {
                    failure.get_or_insert(GpuError::ChannelDisconnected);
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(error) = failure {
            self.release();
            return Err(error);
        }

        let count = self.count as usize;
        let snapshot = RemovalSnapshot {
            removal: self.removal.read(count),
            species: self.species.read(count),
            attribution: self.attribution.read(count),
        };
        self.release();
        Ok(Some(snapshot))
    }

    fn release(&mut self) {
        self.removal.unmap();
        self.species.unmap();
        self.attribution.unmap();
        self.removal.rx = None;
        self.species.rx = None;
        self.attribution.rx = None;
        self.count = 0;
        self.state = SlotState::Idle;
    }
}

/// Blocking read of the first `count` elements of `src`. Used for full
/// particle readback and in tests.
pub fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, GpuError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let size = (count * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    // A dropped sender means the callback never ran
    rx.recv().map_err(|_| GpuError::ChannelDisconnected)??;

    let out = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.unmap();
    Ok(out)
}
