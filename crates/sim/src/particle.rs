//! Fluid particles in structure-of-arrays layout.
//!
//! A particle has no stable handle: it is identified by its slot index, and
//! every compaction reassigns indices. All arrays in [`ParticleArrays`] always
//! have the same length and slot `i` in each refers to the same particle.

use glam::Vec2;

/// Species index into `SimulationConfig::species`.
pub type SpeciesId = u32;

/// Obstacle slots recorded per particle and step.
pub const ATTRIBUTION_SLOTS: usize = 4;

/// Empty attribution slot.
pub const NO_OBSTACLE: i32 = -1;

pub type Attribution = [i32; ATTRIBUTION_SLOTS];

pub const EMPTY_ATTRIBUTION: Attribution = [NO_OBSTACLE; ATTRIBUTION_SLOTS];

/// Why a particle is flagged for removal. Stored on the device as `u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum RemovalCause {
    #[default]
    None = 0,
    /// Swallowed by a drain/outlet obstacle.
    Drain = 1,
    /// Absorbed by an agent obstacle.
    Agent = 2,
}

impl RemovalCause {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Drain,
            2 => Self::Agent,
            _ => Self::None,
        }
    }

    #[inline]
    pub fn is_removed(self) -> bool {
        self != Self::None
    }
}

/// Record `obstacle` in the first free slot unless it is already present.
/// Returns false when all slots are taken by other obstacles.
#[inline]
pub fn record_attribution(record: &mut Attribution, obstacle: i32) -> bool {
    for slot in record.iter_mut() {
        if *slot == obstacle {
            return true;
        }
        if *slot == NO_OBSTACLE {
            *slot = obstacle;
            return true;
        }
    }
    false
}

/// Initial state of a freshly spawned particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewParticle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub species: SpeciesId,
    pub gravity_scale: f32,
}

impl NewParticle {
    pub fn new(position: Vec2, species: SpeciesId) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            species,
            gravity_scale: 1.0,
        }
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }
}

/// Host mirror of every per-particle buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleArrays {
    pub positions: Vec<Vec2>,
    pub predicted: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    /// `(density, near_density)`.
    pub densities: Vec<Vec2>,
    pub gravity_scales: Vec<f32>,
    pub species: Vec<SpeciesId>,
    pub attribution: Vec<Attribution>,
    /// Raw [`RemovalCause`] values.
    pub removal: Vec<u32>,
}

impl ParticleArrays {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            predicted: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            densities: Vec::with_capacity(capacity),
            gravity_scales: Vec::with_capacity(capacity),
            species: Vec::with_capacity(capacity),
            attribution: Vec::with_capacity(capacity),
            removal: Vec::with_capacity(capacity),
        }
    }

    pub fn from_new(particles: &[NewParticle]) -> Self {
        let mut arrays = Self::with_capacity(particles.len());
        for p in particles {
            arrays.push(*p);
        }
        arrays
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, p: NewParticle) {
        self.positions.push(p.position);
        self.predicted.push(p.position);
        self.velocities.push(p.velocity);
        self.densities.push(Vec2::ZERO);
        self.gravity_scales.push(p.gravity_scale);
        self.species.push(p.species);
        self.attribution.push(EMPTY_ATTRIBUTION);
        self.removal.push(RemovalCause::None as u32);
    }

    /// Append all of `other` after the existing particles.
    pub fn append(&mut self, other: &ParticleArrays) {
        self.positions.extend_from_slice(&other.positions);
        self.predicted.extend_from_slice(&other.predicted);
        self.velocities.extend_from_slice(&other.velocities);
        self.densities.extend_from_slice(&other.densities);
        self.gravity_scales.extend_from_slice(&other.gravity_scales);
        self.species.extend_from_slice(&other.species);
        self.attribution.extend_from_slice(&other.attribution);
        self.removal.extend_from_slice(&other.removal);
    }

    /// Keep only the first `len` particles.
    pub fn truncate(&mut self, len: usize) {
        self.positions.truncate(len);
        self.predicted.truncate(len);
        self.velocities.truncate(len);
        self.densities.truncate(len);
        self.gravity_scales.truncate(len);
        self.species.truncate(len);
        self.attribution.truncate(len);
        self.removal.truncate(len);
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    #[inline]
    pub fn removal_cause(&self, index: usize) -> RemovalCause {
        RemovalCause::from_raw(self.removal[index])
    }

    /// Drop every flagged particle, keeping survivors in their relative
    /// order, and reset the flags of the survivors. Returns the number of
    /// particles removed.
    pub fn retain_unremoved(&mut self) -> usize {
        let before = self.len();
        let mut write = 0;
        for read in 0..before {
            if RemovalCause::from_raw(self.removal[read]).is_removed() {
                continue;
            }
            if write != read {
                self.positions[write] = self.positions[read];
                self.predicted[write] = self.predicted[read];
                self.velocities[write] = self.velocities[read];
                self.densities[write] = self.densities[read];
                self.gravity_scales[write] = self.gravity_scales[read];
                self.species[write] = self.species[read];
                self.attribution[write] = self.attribution[read];
            }
            self.removal[write] = RemovalCause::None as u32;
            write += 1;
        }
        self.truncate(write);
        before - write
    }

    /// True when every per-particle array has the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.positions.len();
        self.predicted.len() == n
            && self.velocities.len() == n
            && self.densities.len() == n
            && self.gravity_scales.len() == n
            && self.species.len() == n
            && self.attribution.len() == n
            && self.removal.len() == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> ParticleArrays {
        let particles: Vec<_> = (0..n)
            .map(|i| {
                NewParticle::new(Vec2::new(i as f32, 0.0), (i % 3) as u32)
                    .with_velocity(Vec2::new(0.0, i as f32))
            })
            .collect();
        ParticleArrays::from_new(&particles)
    }

    #[test]
    fn retain_keeps_order_and_resets_flags() {
        let mut p = sample(6);
        p.removal[1] = RemovalCause::Drain as u32;
        p.removal[4] = RemovalCause::Agent as u32;
        let removed = p.retain_unremoved();
        assert_eq!(removed, 2);
        assert_eq!(p.len(), 4);
        assert!(p.is_consistent());
        let xs: Vec<f32> = p.positions.iter().map(|v| v.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 3.0, 5.0]);
        assert!(p.removal.iter().all(|&r| r == 0));
    }

    #[test]
    fn retain_everything_removed() {
        let mut p = sample(3);
        p.removal.iter_mut().for_each(|r| *r = RemovalCause::Drain as u32);
        assert_eq!(p.retain_unremoved(), 3);
        assert!(p.is_empty());
        assert!(p.is_consistent());
    }

    #[test]
    fn attribution_fills_free_slots_without_duplicates() {
        let mut record = EMPTY_ATTRIBUTION;
        assert!(record_attribution(&mut record, 3));
        assert!(record_attribution(&mut record, 3));
        assert!(record_attribution(&mut record, 7));
        assert_eq!(record, [3, 7, NO_OBSTACLE, NO_OBSTACLE]);
        assert!(record_attribution(&mut record, 1));
        assert!(record_attribution(&mut record, 2));
        assert!(!record_attribution(&mut record, 9));
        assert_eq!(record, [3, 7, 1, 2]);
    }

    #[test]
    fn removal_cause_from_raw() {
        assert_eq!(RemovalCause::from_raw(0), RemovalCause::None);
        assert_eq!(RemovalCause::from_raw(1), RemovalCause::Drain);
        assert_eq!(RemovalCause::from_raw(2), RemovalCause::Agent);
        assert_eq!(RemovalCause::from_raw(99), RemovalCause::None);
    }
}
