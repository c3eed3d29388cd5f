//! GPU-resident fluid simulation.
//!
//! Mirrors the API of `sim::CpuSimulation`: the embedding application
//! registers obstacles and force zones, sets the interaction point, calls
//! [`FluidSimulation::update`] once per rendered frame and reads removal
//! tallies back. Particle data stays on the device; [`FluidSimulation::read_particles`]
//! copies it out on demand.

use std::sync::Arc;

use sim::particle::{NewParticle, ParticleArrays};
use sim::solver::{StepCallback, StepEvent, StepInputs};
use sim::{
    ForceZone, Interaction, KernelCoefficients, Obstacle, ObstacleLayout, RemovalTally,
    SimulationConfig, Spawner,
};

use crate::context::{DeviceHealth, GpuContext};
use crate::obstacles::ObstacleUploader;
use crate::particle_store::ParticleStore;
use crate::population::PopulationManager;
use crate::spatial_hash::GpuSpatialHash;
use crate::stepper::SimulationStepper;
use crate::GpuError;

pub struct FluidSimulation {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    health: DeviceHealth,
    config: SimulationConfig,
    kernels: KernelCoefficients,
    stepper: SimulationStepper,
    population: PopulationManager,
    obstacles: Vec<Obstacle>,
    zones: Vec<ForceZone>,
    layout: ObstacleLayout,
    interaction: Option<Interaction>,
    spawner: Spawner,
    step_index: u64,
    observers: Vec<StepCallback>,
}

impl FluidSimulation {
    pub fn new(context: &GpuContext, config: SimulationConfig) -> Result<Self, GpuError> {
        Self::with_device(
            Arc::clone(&context.device),
            Arc::clone(&context.queue),
            context.health.clone(),
            config,
        )
    }

    pub fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        health: DeviceHealth,
        config: SimulationConfig,
    ) -> Result<Self, GpuError> {
        config.validate()?;
        let kernels = KernelCoefficients::new_or_default(config.smoothing_radius);
        let mut spawner = Spawner::new(config.spawn_regions.clone(), config.seed);
        let initial = spawner.initial(0, config.max_particles as usize);

        let capacity = config.initial_capacity.max(initial.len() as u32);
        let store = ParticleStore::new(&device, capacity, config.max_particles);
        let hash = GpuSpatialHash::new(&device, store.capacity())?;
        let uploader = ObstacleUploader::new(&device);
        let mut population = PopulationManager::new(&device, store.capacity(), config.species.len());
        let mut stepper = SimulationStepper::new(&device, &queue, store, hash, uploader, &config.species)?;
        population.grow(&device, &queue, stepper.store_mut(), &initial);

        log::info!(
            "GPU simulation: {} particles, {} species, {} spawn regions",
            stepper.store().live(),
            config.species.len(),
            config.spawn_regions.len()
        );

        Ok(Self {
            device,
            queue,
            health,
            kernels,
            stepper,
            population,
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

    pub fn particle_count(&self) -> usize {
        self.stepper.store().live() as usize
    }

    pub fn store(&self) -> &ParticleStore {
        self.stepper.store()
    }

    pub fn removal_tally(&self) -> &RemovalTally {
        self.population.tally()
    }

    /// Removal readbacks that failed since creation.
    pub fn readback_faults(&self) -> u64 {
        self.population.faults()
    }

    pub fn layout(&self) -> &ObstacleLayout {
        &self.layout
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn spawner_mut(&mut self) -> &mut Spawner {
        &mut self.spawner
    }

    pub fn set_obstacles(&mut self, obstacles: &[Obstacle]) {
        self.obstacles = obstacles.to_vec();
        self.upload_layout();
    }

    pub fn set_force_zones(&mut self, zones: &[ForceZone]) {
        self.zones = zones.to_vec();
        self.upload_layout();
    }

    fn upload_layout(&mut self) {
        self.layout = ObstacleLayout::build(&self.obstacles, &self.zones);
        self.stepper
            .obstacles_mut()
            .upload(&self.device, &self.queue, self.layout.clone());
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
        self.population
            .grow(&self.device, &self.queue, self.stepper.store_mut(), new)
    }

    /// Advance one rendered frame: continuous spawning, then
    /// `iterations_per_frame` sub-steps.
    pub fn update(&mut self, frame_dt: f32) -> Result<(), GpuError> {
        let dt = self.config.sub_step_dt(frame_dt);
        let frame_time = dt * self.config.iterations_per_frame as f32;
        let spawned = self.spawner.continuous(
            frame_time,
            self.particle_count(),
            self.config.max_particles as usize,
        );
        if !spawned.is_empty() {
            self.spawn_particles(&spawned);
        }
        for _ in 0..self.config.iterations_per_frame {
            self.step(dt)?;
        }
        Ok(())
    }

    /// One sub-step: record and submit the pipeline, then read back removal
    /// flags and compact. A step with no particles is skipped entirely.
    pub fn step(&mut self, dt: f32) -> Result<(), GpuError> {
        self.health.check()?;
        if self.particle_count() == 0 {
            return Ok(());
        }

        let inputs = StepInputs::new(&self.config, self.interaction, dt);
        self.stepper
            .prepare(&self.device, &self.queue, &inputs, &self.kernels)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Step Encoder"),
            });
        self.stepper.encode(&mut encoder);
        self.population
            .schedule(&self.device, &mut encoder, self.stepper.store());
        self.queue.submit(Some(encoder.finish()));
        self.population.start_map();

        self.population.process(
            &self.device,
            &self.queue,
            &self.health,
            self.stepper.store_mut(),
            &self.layout,
        )?;

        self.step_index += 1;
        let event = StepEvent {
            step_index: self.step_index,
            particle_count: self.particle_count(),
            dt,
        };
        for observer in &mut self.observers {
            observer(&event);
        }
        Ok(())
    }

    /// Blocking copy of every live particle.
    pub fn read_particles(&self) -> Result<ParticleArrays, GpuError> {
        self.stepper.store().read_live(&self.device, &self.queue)
    }
}
