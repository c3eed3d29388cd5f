//! Population manager: growth, removal readback and compaction.
//!
//! Removal flags, species and attribution are read back after every step
//! and tallied from that snapshot. When any particle is flagged, the live
//! particles are read back in full, compacted on the host (stable, survivors
//! keep their relative order) and re-uploaded over the live prefix.
//!
//! A failed readback is logged and retried on the next step; the flags stay
//! set on the device until then and nothing is tallied twice. After
//! [`MAX_CONSECUTIVE_FAULTS`] failures in a row the step fails with
//! [`GpuError::ReadbackStalled`].

use sim::particle::NewParticle;
use sim::{ObstacleLayout, RemovalTally};

use crate::context::DeviceHealth;
use crate::particle_store::ParticleStore;
use crate::readback::RemovalReadback;
use crate::GpuError;

/// Failed removal readbacks in a row tolerated before a step errors out.
pub const MAX_CONSECUTIVE_FAULTS: u32 = 3;

#[derive(Debug, Default)]
struct FaultTracker {
    total: u64,
    consecutive: u32,
}

impl FaultTracker {
    /// Count a failed readback. Errors once the run of failures reaches
    /// [`MAX_CONSECUTIVE_FAULTS`].
    fn record(&mut self, what: &str, error: &GpuError) -> Result<(), GpuError> {
        self.total += 1;
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_FAULTS {
            log::error!("{} failed {} steps in a row: {}", what, self.consecutive, error);
            return Err(GpuError::ReadbackStalled {
                faults: self.consecutive,
            });
        }
        log::warn!("{} failed, retrying next step: {}", what, error);
        Ok(())
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }
}

pub struct PopulationManager {
    readback: RemovalReadback,
    tally: RemovalTally,
    faults: FaultTracker,
}

impl PopulationManager {
    pub fn new(device: &wgpu::Device, capacity: u32, num_species: usize) -> Self {
        Self {
            readback: RemovalReadback::new(device, capacity),
            tally: RemovalTally::new(num_species),
            faults: FaultTracker::default(),
        }
    }

    pub fn tally(&self) -> &RemovalTally {
        &self.tally
    }

    /// Readbacks that failed since creation.
    pub fn faults(&self) -> u64 {
        self.faults.total
    }

    /// Append particles to the store, growing it as needed. Returns how many
    /// fit under the particle ceiling.
    ///
    /// Safe while a readback is in flight: the staged copies cover the old
    /// live prefix only, and appended particles start unflagged.
    pub fn grow(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        store: &mut ParticleStore,
        new: &[NewParticle],
    ) -> usize {
        store.append(device, queue, new)
    }

    /// Record the end-of-step removal copies into `encoder`.
    pub fn schedule(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        store: &ParticleStore,
    ) -> bool {
        self.readback.schedule(device, encoder, store)
    }

    /// Start mapping after the step was submitted.
    pub fn start_map(&mut self) {
        self.readback.start_map();
    }

    /// Wait for the scheduled readback, tally and compact. Returns the number
    /// of particles removed. A lost device or a stalled readback is an error;
    /// any other failure is retried on the next step.
    pub fn process(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        health: &DeviceHealth,
        store: &mut ParticleStore,
        layout: &ObstacleLayout,
    ) -> Result<usize, GpuError> {
        let snapshot = match self.readback.wait(device, health) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(0),
            Err(GpuError::DeviceLost) => return Err(GpuError::DeviceLost),
            Err(e) => {
                self.faults.record("Removal readback", &e)?;
                return Ok(0);
            }
        };
        if !snapshot.any_flagged() {
            self.faults.succeeded();
            return Ok(0);
        }

        // Flags stay set on failure and are tallied on the retry
        let mut particles = match store.read_live(device, queue) {
            Ok(particles) => particles,
            Err(e) => {
                self.faults.record("Particle readback for compaction", &e)?;
                return Ok(0);
            }
        };
        self.faults.succeeded();
        let flagged = snapshot.tally_into(layout, &mut self.tally);
        let removed = particles.retain_unremoved();
        debug_assert_eq!(flagged, removed);
        store.replace_live(queue, &particles);
        log::debug!("Compacted {} particles, {} remain", removed, store.live());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_faults_are_retried() {
        let mut faults = FaultTracker::default();
        for _ in 0..5 {
            assert!(faults.record("Removal readback", &GpuError::ChannelDisconnected).is_ok());
            faults.succeeded();
        }
        assert_eq!(faults.total, 5);
        assert_eq!(faults.consecutive, 0);
    }

    #[test]
    fn consecutive_faults_escalate() {
        let mut faults = FaultTracker::default();
        for _ in 1..MAX_CONSECUTIVE_FAULTS {
            assert!(faults.record("Removal readback", &GpuError::ChannelDisconnected).is_ok());
        }
        let stalled = faults.record("Removal readback", &GpuError::ChannelDisconnected);
        assert!(matches!(
            stalled,
            Err(GpuError::ReadbackStalled { faults }) if faults == MAX_CONSECUTIVE_FAULTS
        ));
        assert_eq!(faults.total, MAX_CONSECUTIVE_FAULTS as u64);
    }

    #[test]
    fn success_resets_the_run() {
        let mut faults = FaultTracker::default();
        for _ in 1..MAX_CONSECUTIVE_FAULTS {
            faults.record("Removal readback", &GpuError::ChannelDisconnected).ok();
        }
        faults.succeeded();
        assert!(faults.record("Removal readback", &GpuError::ChannelDisconnected).is_ok());
        assert_eq!(faults.consecutive, 1);
    }
}
