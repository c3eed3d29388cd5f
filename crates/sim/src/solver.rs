//! CPU stepper.
//!
//! Runs the same eight-stage pipeline as the GPU stepper with rayon, one
//! parallel loop per stage. It is the reference the GPU results are tested
//! against and a fallback for machines without a usable adapter.

use glam::Vec2;
use rayon::prelude::*;

use crate::error::ConfigError;
use crate::kernels;
use crate::obstacle::{
    obstacle_contact, reflect_velocity, ForceZone, Obstacle, ObstacleKind, ObstacleLayout,
};
use crate::params::{Interaction, KernelCoefficients, SimulationConfig, SpeciesParams};
use crate::particle::{record_attribution, NewParticle, ParticleArrays, RemovalCause, EMPTY_ATTRIBUTION};
use crate::pipeline::{StepStage, PIPELINE};
use crate::population::{clamp_spawn, scan_removals, RemovalTally};
use crate::spatial_hash::SpatialHash;
use crate::spawn::Spawner;

/// Passed to step observers after every completed sub-step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEvent {
    /// Number of completed sub-steps, starting at 1.
    pub step_index: u64,
    /// Live particles after this step's removals.
    pub particle_count: usize,
    pub dt: f32,
}

pub type StepCallback = Box<dyn FnMut(&StepEvent) + Send>;

/// Per-step values every pass reads.
#[derive(Clone, Copy, Debug)]
pub struct StepInputs {
    pub dt: f32,
    pub gravity: f32,
    pub collision_damping: f32,
    pub prediction_factor: f32,
    pub particle_radius: f32,
    pub bounds_half: Vec2,
    pub bounds_center: Vec2,
    pub interaction: Option<Interaction>,
    pub interaction_radius: f32,
}

impl StepInputs {
    pub fn new(config: &SimulationConfig, interaction: Option<Interaction>, dt: f32) -> Self {
        Self {
            dt,
            gravity: config.gravity,
            collision_damping: config.collision_damping,
            prediction_factor: config.prediction_factor,
            particle_radius: config.particle_radius,
            bounds_half: config.bounds_half_size(),
            bounds_center: config.bounds_center,
            interaction,
            interaction_radius: config.interaction_radius,
        }
    }
}

/// Acceleration from gravity, the interaction point and force zones.
pub fn external_acceleration(
    pos: Vec2,
    vel: Vec2,
    gravity_scale: f32,
    inputs: &StepInputs,
    layout: &ObstacleLayout,
) -> Vec2 {
    let gravity = Vec2::new(0.0, inputs.gravity * gravity_scale);
    let mut accel = gravity;

    if let Some(interaction) = inputs.interaction {
        let radius = inputs.interaction_radius;
        let offset = interaction.point - pos;
        let sqr_dst = offset.length_squared();
        if interaction.strength != 0.0 && radius > 0.0 && sqr_dst < radius * radius {
            let dst = sqr_dst.sqrt();
            let edge_t = dst / radius;
            let centre_t = 1.0 - edge_t;
            let dir = if dst > 1e-6 { offset / dst } else { Vec2::ZERO };
            let gravity_weight = 1.0 - centre_t * (interaction.strength / 10.0).clamp(0.0, 1.0);
            accel = gravity * gravity_weight + dir * centre_t * interaction.strength - vel * centre_t;
        }
    }

    for zone in &layout.zones {
        accel += zone.acceleration(pos);
    }
    accel
}

/// Push a particle back inside the bounds rectangle.
#[inline]
pub fn resolve_bounds(pos: &mut Vec2, vel: &mut Vec2, inputs: &StepInputs) {
    let half = inputs.bounds_half;
    let mut local = *pos - inputs.bounds_center;
    if local.x.abs() > half.x {
        local.x = half.x * local.x.signum();
        vel.x *= -inputs.collision_damping;
    }
    if local.y.abs() > half.y {
        local.y = half.y * local.y.signum();
        vel.y *= -inputs.collision_damping;
    }
    *pos = local + inputs.bounds_center;
}

/// Neighbour-sorted copies of the particle data used by the physics passes.
#[derive(Debug, Default)]
struct SortedScratch {
    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    velocities_out: Vec<Vec2>,
    densities: Vec<Vec2>,
    species: Vec<u32>,
}

pub struct CpuSimulation {
    config: SimulationConfig,
    kernels: KernelCoefficients,
    particles: ParticleArrays,
    hash: SpatialHash,
    sorted: SortedScratch,
    obstacles: Vec<Obstacle>,
    zones: Vec<ForceZone>,
    layout: ObstacleLayout,
    interaction: Option<Interaction>,
    spawner: Spawner,
    tally: RemovalTally,
    step_index: u64,
    observers: Vec<StepCallback>,
}

impl CpuSimulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let kernels = KernelCoefficients::new_or_default(config.smoothing_radius);
        let mut spawner = Spawner::new(config.spawn_regions.clone(), config.seed);
        let initial = spawner.initial(0, config.max_particles as usize);
        let particles = ParticleArrays::from_new(&initial);
        log::info!(
            "CPU simulation: {} particles, {} species, {} spawn regions",
            particles.len(),
            config.species.len(),
            config.spawn_regions.len()
        );

        Ok(Self {
            tally: RemovalTally::new(config.species.len()),
            kernels,
            particles,
            hash: SpatialHash::new(),
            sorted: SortedScratch::default(),
            obstacles: Vec::new(),
            zones: Vec::new(),
            layout: ObstacleLayout::default(),
            interaction: None,
            spawner,
            step_index: 0,
            observers: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn kernels(&self) -> &KernelCoefficients {
        &self.kernels
    }

    pub fn particles(&self) -> &ParticleArrays {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn removal_tally(&self) -> &RemovalTally {
        &self.tally
    }

    pub fn layout(&self) -> &ObstacleLayout {
        &self.layout
    }

    pub fn spatial_hash(&self) -> &SpatialHash {
        &self.hash
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn spawner_mut(&mut self) -> &mut Spawner {
        &mut self.spawner
    }

    pub fn set_obstacles(&mut self, obstacles: &[Obstacle]) {
        self.obstacles = obstacles.to_vec();
        self.layout = ObstacleLayout::build(&self.obstacles, &self.zones);
    }

    pub fn set_force_zones(&mut self, zones: &[ForceZone]) {
        self.zones = zones.to_vec();
        self.layout = ObstacleLayout::build(&self.obstacles, &self.zones);
    }

    pub fn set_interaction(&mut self, interaction: Option<Interaction>) {
        self.interaction = interaction;
    }

    /// Returns false and keeps the current kernels for a degenerate radius.
    pub fn set_smoothing_radius(&mut self, radius: f32) -> bool {
        let accepted = self.kernels.update(radius);
        if accepted {
            self.config.smoothing_radius = radius;
        }
        accepted
    }

    pub fn on_step_completed(&mut self, callback: impl FnMut(&StepEvent) + Send + 'static) {
        self.observers.push(Box::new(callback));
    }

    /// Append particles, clamped to `max_particles`. Returns how many were
    /// added.
    pub fn spawn_particles(&mut self, new: &[NewParticle]) -> usize {
        let count = clamp_spawn(
            self.particles.len(),
            new.len(),
            self.config.max_particles as usize,
        );
        for p in &new[..count] {
            self.particles.push(*p);
        }
        count
    }

    /// Advance one rendered frame: continuous spawning, then
    /// `iterations_per_frame` sub-steps.
    pub fn update(&mut self, frame_dt: f32) {
        let dt = self.config.sub_step_dt(frame_dt);
        let frame_time = dt * self.config.iterations_per_frame as f32;
        let spawned = self.spawner.continuous(
            frame_time,
            self.particles.len(),
            self.config.max_particles as usize,
        );
        // The spawner already clamped to the ceiling
        for p in spawned {
            self.particles.push(p);
        }
        for _ in 0..self.config.iterations_per_frame {
            self.step(dt);
        }
    }

    /// One sub-step through the full pipeline, followed by removal
    /// processing. A step with no particles is skipped entirely.
    pub fn step(&mut self, dt: f32) {
        if self.particles.is_empty() {
            return;
        }
        let inputs = StepInputs::new(&self.config, self.interaction, dt);
        for stage in PIPELINE {
            self.run_stage(stage, &inputs);
        }

        let flagged = scan_removals(
            &self.particles.removal,
            &self.particles.species,
            &self.particles.attribution,
            &self.layout,
            &mut self.tally,
        );
        if flagged > 0 {
            self.particles.retain_unremoved();
            log::debug!(
                "Removed {} particles, {} remain",
                flagged,
                self.particles.len()
            );
        }

        self.step_index += 1;
        let event = StepEvent {
            step_index: self.step_index,
            particle_count: self.particles.len(),
            dt,
        };
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    fn run_stage(&mut self, stage: StepStage, inputs: &StepInputs) {
        match stage {
            StepStage::ExternalForces => self.external_forces(inputs),
            StepStage::HashRebuild => self.hash.run(&self.particles.predicted, self.kernels.radius),
            StepStage::Reorder => self.reorder(),
            StepStage::Density => self.density(),
            StepStage::Pressure => self.pressure(inputs.dt),
            StepStage::Viscosity => self.viscosity(inputs.dt),
            StepStage::CopyBack => self.copy_back(),
            StepStage::PositionUpdate => self.position_update(inputs),
        }
    }

    fn external_forces(&mut self, inputs: &StepInputs) {
        let layout = &self.layout;
        let ParticleArrays {
            positions,
            predicted,
            velocities,
            gravity_scales,
            attribution,
            ..
        } = &mut self.particles;

        velocities
            .par_iter_mut()
            .zip(predicted.par_iter_mut())
            .zip(attribution.par_iter_mut())
            .enumerate()
            .for_each(|(i, ((vel, pred), record))| {
                let accel = external_acceleration(positions[i], *vel, gravity_scales[i], inputs, layout);
                *vel += accel * inputs.dt;
                *pred = positions[i] + *vel * inputs.prediction_factor;
                *record = EMPTY_ATTRIBUTION;
            });
    }

    fn reorder(&mut self) {
        let order = self.hash.sorted_indices();
        let p = &self.particles;
        let s = &mut self.sorted;
        s.positions.clear();
        s.positions.extend(order.iter().map(|&i| p.predicted[i as usize]));
        s.velocities.clear();
        s.velocities.extend(order.iter().map(|&i| p.velocities[i as usize]));
        s.species.clear();
        s.species.extend(order.iter().map(|&i| p.species[i as usize]));
        s.densities.clear();
        s.densities.resize(order.len(), Vec2::ZERO);
        s.velocities_out.clear();
        s.velocities_out.resize(order.len(), Vec2::ZERO);
    }

    fn density(&mut self) {
        let k = &self.kernels;
        let hash = &self.hash;
        let SortedScratch {
            positions, densities, ..
        } = &mut self.sorted;

        densities.par_iter_mut().enumerate().for_each(|(p, out)| {
            let pos = positions[p];
            let mut density = 0.0;
            let mut near_density = 0.0;
            hash.for_each_candidate(pos, k.radius, |q| {
                let sqr_dst = (positions[q] - pos).length_squared();
                if sqr_dst > k.sqr_radius {
                    return;
                }
                let dst = sqr_dst.sqrt();
                density += kernels::density_kernel(dst, k);
                near_density += kernels::near_density_kernel(dst, k);
            });
            *out = Vec2::new(density, near_density);
        });
    }

    fn pressure(&mut self, dt: f32) {
        let k = &self.kernels;
        let hash = &self.hash;
        let species_table = &self.config.species;
        let SortedScratch {
            positions,
            velocities,
            densities,
            species,
            ..
        } = &mut self.sorted;

        velocities.par_iter_mut().enumerate().for_each(|(p, vel)| {
            let params = species_lookup(species_table, species[p]);
            let density = densities[p];
            let pressure = params.pressure_from_density(density.x);
            let near_pressure = params.near_pressure_from_density(density.y);
            let pos = positions[p];
            let mut force = Vec2::ZERO;

            hash.for_each_candidate(pos, k.radius, |q| {
                if q == p {
                    return;
                }
                let offset = positions[q] - pos;
                let sqr_dst = offset.length_squared();
                if sqr_dst > k.sqr_radius {
                    return;
                }
                let dst = sqr_dst.sqrt();
                let dir = if dst > 0.0 { offset / dst } else { Vec2::Y };

                let neighbour = species_lookup(species_table, species[q]);
                let n_density = densities[q];
                let shared = (pressure + neighbour.pressure_from_density(n_density.x)) * 0.5;
                let shared_near =
                    (near_pressure + neighbour.near_pressure_from_density(n_density.y)) * 0.5;
                if n_density.x > 0.0 {
                    force += dir * kernels::density_derivative(dst, k) * shared / n_density.x;
                }
                if n_density.y > 0.0 {
                    force += dir * kernels::near_density_derivative(dst, k) * shared_near / n_density.y;
                }
            });

            if density.x > 0.0 {
                *vel += force / density.x * dt;
            }
        });
    }

    fn viscosity(&mut self, dt: f32) {
        let k = &self.kernels;
        let hash = &self.hash;
        let species_table = &self.config.species;
        let SortedScratch {
            positions,
            velocities,
            velocities_out,
            species,
            ..
        } = &mut self.sorted;

        velocities_out.par_iter_mut().enumerate().for_each(|(p, out)| {
            let pos = positions[p];
            let vel = velocities[p];
            let mut force = Vec2::ZERO;
            hash.for_each_candidate(pos, k.radius, |q| {
                if q == p {
                    return;
                }
                let sqr_dst = (positions[q] - pos).length_squared();
                if sqr_dst > k.sqr_radius {
                    return;
                }
                force += (velocities[q] - vel) * kernels::viscosity_kernel(sqr_dst.sqrt(), k);
            });
            let strength = species_lookup(species_table, species[p]).viscosity_strength;
            *out = vel + force * strength * dt;
        });
    }

    fn copy_back(&mut self) {
        let order = self.hash.sorted_indices();
        for (p, &i) in order.iter().enumerate() {
            self.particles.velocities[i as usize] = self.sorted.velocities_out[p];
            self.particles.densities[i as usize] = self.sorted.densities[p];
        }
    }

    fn position_update(&mut self, inputs: &StepInputs) {
        let layout = &self.layout;
        let species_count = self.config.species.len() as u32;
        let ParticleArrays {
            positions,
            velocities,
            species,
            attribution,
            removal,
            ..
        } = &mut self.particles;

        positions
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .zip(attribution.par_iter_mut())
            .zip(removal.par_iter_mut())
            .enumerate()
            .for_each(|(i, (((pos, vel), record), removal))| {
                let prev = *pos;
                let mut p = prev + *vel * inputs.dt;
                let mut v = *vel;
                let s = species[i].min(species_count.saturating_sub(1));

                for (index, obstacle) in layout.records.iter().enumerate() {
                    let Some(contact) = obstacle_contact(
                        obstacle,
                        layout.vertices_of(obstacle),
                        prev,
                        p,
                        inputs.particle_radius,
                    ) else {
                        continue;
                    };
                    p = contact.position;
                    v = reflect_velocity(v, contact.normal, inputs.collision_damping);

                    match obstacle.kind {
                        ObstacleKind::Static => {}
                        ObstacleKind::Agent => {
                            record_attribution(record, index as i32);
                            if *removal == RemovalCause::None as u32
                                && s < 32
                                && obstacle.absorbs & (1 << s) != 0
                            {
                                *removal = RemovalCause::Agent as u32;
                            }
                        }
                        ObstacleKind::Drain => {
                            record_attribution(record, index as i32);
                            if *removal == RemovalCause::None as u32 {
                                *removal = RemovalCause::Drain as u32;
                            }
                        }
                    }
                }

                resolve_bounds(&mut p, &mut v, inputs);
                *pos = p;
                *vel = v;
            });
    }
}

fn species_lookup(table: &[SpeciesParams], species: u32) -> &SpeciesParams {
    let last = table.len().saturating_sub(1);
    &table[(species as usize).min(last)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            gravity: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn empty_simulation_skips_steps() {
        let mut sim = CpuSimulation::new(quiet_config()).unwrap();
        sim.step(1.0 / 60.0);
        assert_eq!(sim.step_index(), 0);
        assert_eq!(sim.particle_count(), 0);
    }

    #[test]
    fn bounds_reflect_and_damp() {
        let inputs = StepInputs::new(&quiet_config(), None, 0.01);
        let mut pos = Vec2::new(100.0, 0.0);
        let mut vel = Vec2::new(2.0, 1.0);
        resolve_bounds(&mut pos, &mut vel, &inputs);
        assert_eq!(pos.x, inputs.bounds_half.x);
        assert!((vel.x + 2.0 * 0.95).abs() < 1e-6);
        assert_eq!(vel.y, 1.0);
    }

    #[test]
    fn interaction_pulls_towards_point() {
        let config = quiet_config();
        let inputs = StepInputs::new(&config, Some(Interaction::pull(Vec2::ZERO, &config)), 0.01);
        let accel = external_acceleration(
            Vec2::new(1.0, 0.0),
            Vec2::ZERO,
            1.0,
            &inputs,
            &ObstacleLayout::default(),
        );
        assert!(accel.x < 0.0);
        assert_eq!(accel.y, 0.0);
    }

    #[test]
    fn gravity_scale_multiplies_gravity() {
        let config = SimulationConfig::default();
        let inputs = StepInputs::new(&config, None, 0.01);
        let layout = ObstacleLayout::default();
        let a = external_acceleration(Vec2::ZERO, Vec2::ZERO, 0.5, &inputs, &layout);
        assert!((a.y - config.gravity * 0.5).abs() < 1e-6);
    }

    #[test]
    fn observers_see_every_sub_step() {
        use std::sync::{Arc, Mutex};

        let mut sim = CpuSimulation::new(quiet_config()).unwrap();
        sim.spawn_particles(&[NewParticle::new(Vec2::ZERO, 0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sim.on_step_completed(move |event| sink.lock().unwrap().push(*event));
        sim.update(1.0 / 60.0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().map(|e| e.step_index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(seen.iter().all(|e| e.particle_count == 1));
        assert!((seen[0].dt - 1.0 / 180.0).abs() < 1e-7);
    }

    #[test]
    fn continuous_spawn_fills_exactly_to_ceiling() {
        use crate::spawn::SpawnRegion;

        let config = SimulationConfig {
            max_particles: 40,
            spawn_regions: vec![SpawnRegion::new(Vec2::ZERO, Vec2::splat(2.0), 0).with_rate(6_000.0)],
            ..quiet_config()
        };
        let mut sim = CpuSimulation::new(config).unwrap();
        assert_eq!(sim.particle_count(), 0);

        // About 100 particles are due per frame
        sim.update(1.0 / 60.0);
        assert_eq!(sim.particle_count(), 40);
        sim.update(1.0 / 60.0);
        assert_eq!(sim.particle_count(), 40);
        assert!(sim.particles().is_consistent());
    }

    #[test]
    fn degenerate_radius_is_ignored() {
        let mut sim = CpuSimulation::new(quiet_config()).unwrap();
        assert!(!sim.set_smoothing_radius(0.0));
        assert_eq!(sim.kernels().radius, 0.35);
        assert!(sim.set_smoothing_radius(0.5));
        assert_eq!(sim.config().smoothing_radius, 0.5);
    }
}
