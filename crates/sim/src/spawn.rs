//! Spawn regions: initial bursts and continuous emitters.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::particle::{NewParticle, SpeciesId};
use crate::population::clamp_spawn;

/// An axis-aligned rectangle that emits particles of one species.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRegion {
    /// Centre of the rectangle.
    pub position: Vec2,
    pub size: Vec2,
    pub species: SpeciesId,
    /// Particles per unit area placed when the simulation starts.
    pub initial_density: f32,
    /// Particles per second emitted continuously.
    pub rate: f32,
    pub velocity: Vec2,
    pub gravity_scale: f32,
    /// Fractional particles carried over between frames.
    #[serde(skip)]
    accumulator: f32,
}

impl Default for SpawnRegion {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            size: Vec2::ONE,
            species: 0,
            initial_density: 0.0,
            rate: 0.0,
            velocity: Vec2::ZERO,
            gravity_scale: 1.0,
            accumulator: 0.0,
        }
    }
}

impl SpawnRegion {
    pub fn new(position: Vec2, size: Vec2, species: SpeciesId) -> Self {
        Self {
            position,
            size,
            species,
            ..Default::default()
        }
    }

    pub fn with_initial_density(mut self, density: f32) -> Self {
        self.initial_density = density;
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn area(&self) -> f32 {
        self.size.x.max(0.0) * self.size.y.max(0.0)
    }

    pub fn min_corner(&self) -> Vec2 {
        self.position - self.size * 0.5
    }

    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    /// Number of particles in the initial burst.
    pub fn initial_count(&self) -> usize {
        let count = self.area() * self.initial_density.max(0.0);
        if count.is_finite() {
            count.floor() as usize
        } else {
            0
        }
    }

    /// Advance the rate accumulator by `dt` and take the whole particles
    /// that became due. The fractional remainder stays for the next frame.
    pub fn take_continuous(&mut self, dt: f32) -> usize {
        if !(self.rate > 0.0 && dt > 0.0) {
            return 0;
        }
        self.accumulator += self.rate * dt;
        let whole = self.accumulator.floor();
        self.accumulator -= whole;
        whole as usize
    }

    /// `count` particles on a jittered grid covering the rectangle.
    pub fn generate_initial(&self, count: usize, rng: &mut StdRng) -> Vec<NewParticle> {
        if count == 0 {
            return Vec::new();
        }
        let size = self.size.max(Vec2::splat(f32::EPSILON));
        let aspect = size.x / size.y;
        let cols = ((count as f32 * aspect).sqrt().ceil() as usize).max(1);
        let rows = count.div_ceil(cols).max(1);
        let cell = Vec2::new(size.x / cols as f32, size.y / rows as f32);
        let origin = self.min_corner();

        (0..count)
            .map(|i| {
                let (cx, cy) = (i % cols, i / cols);
                let jitter = Vec2::new(rng.gen::<f32>() - 0.5, rng.gen::<f32>() - 0.5) * 0.5;
                let local = (Vec2::new(cx as f32, cy as f32) + Vec2::splat(0.5) + jitter) * cell;
                self.particle_at(origin + local)
            })
            .collect()
    }

    /// `count` particles placed uniformly at random in the rectangle.
    pub fn generate_continuous(&self, count: usize, rng: &mut StdRng) -> Vec<NewParticle> {
        let origin = self.min_corner();
        (0..count)
            .map(|_| {
                let local = Vec2::new(rng.gen::<f32>(), rng.gen::<f32>()) * self.size;
                self.particle_at(origin + local)
            })
            .collect()
    }

    fn particle_at(&self, position: Vec2) -> NewParticle {
        NewParticle {
            position,
            velocity: self.velocity,
            species: self.species,
            gravity_scale: self.gravity_scale,
        }
    }
}

/// Owns the live spawn regions and the seeded generator.
#[derive(Debug)]
pub struct Spawner {
    regions: Vec<SpawnRegion>,
    rng: StdRng,
}

impl Spawner {
    pub fn new(regions: Vec<SpawnRegion>, seed: u64) -> Self {
        Self {
            regions,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn regions(&self) -> &[SpawnRegion] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut Vec<SpawnRegion> {
        &mut self.regions
    }

    /// Initial bursts of every region, clamped so `live` plus the result
    /// never exceeds `ceiling`.
    pub fn initial(&mut self, live: usize, ceiling: usize) -> Vec<NewParticle> {
        let mut spawned = Vec::new();
        for region in &self.regions {
            let count = clamp_spawn(live + spawned.len(), region.initial_count(), ceiling);
            spawned.extend(region.generate_initial(count, &mut self.rng));
        }
        spawned
    }

    /// Continuous emission for a frame of `dt` seconds. Particles that do not
    /// fit under `ceiling` are dropped, not deferred.
    pub fn continuous(&mut self, dt: f32, live: usize, ceiling: usize) -> Vec<NewParticle> {
        let mut spawned = Vec::new();
        for region in &mut self.regions {
            let due = region.take_continuous(dt);
            let count = clamp_spawn(live + spawned.len(), due, ceiling);
            spawned.extend(region.generate_continuous(count, &mut self.rng));
        }
        spawned
    }
}
