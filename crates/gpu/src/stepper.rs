//! GPU simulation stepper.
//!
//! Owns the particle store, the spatial hash and the obstacle uploader, all
//! injected at construction, and records one sub-step as the eight passes of
//! [`sim::PIPELINE`] in order. Bind groups are rebuilt lazily whenever the
//! store or the obstacle buffers were reallocated.

use sim::pipeline::{StepStage, PIPELINE};
use sim::solver::StepInputs;
use sim::{KernelCoefficients, SpeciesParams};

use crate::obstacles::ObstacleUploader;
use crate::params::{SceneCounts, SimParams, SpeciesGpu};
use crate::particle_store::ParticleStore;
use crate::pipeline_builder::{bind_buffers, storage_buffer, uniform_buffer, PipelineBuilder};
use crate::spatial_hash::GpuSpatialHash;
use crate::{shaders, workgroups, GpuError};

struct StepPipelines {
    forces: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    reorder: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    density: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    pressure: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    viscosity: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    copy_back: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
    collision: (wgpu::ComputePipeline, wgpu::BindGroupLayout),
}

impl StepPipelines {
    fn new(device: &wgpu::Device) -> Result<Self, GpuError> {
        let params_size = std::mem::size_of::<SimParams>() as u64;
        let build = |label: &'static str, source: &'static str, entry: &'static str, flags: &[bool]| {
            PipelineBuilder::new(device)
                .shader_source(source)
                .label(label)
                .entry_point(entry)
                .uniform_buffer_size(params_size)
                .storage_buffers(flags)
                .build()
        };
        Ok(Self {
            forces: build(
                "external_forces",
                shaders::FORCES,
                "external_forces",
                &[true, false, false, true, false, true],
            )?,
            reorder: build(
                "reorder",
                shaders::REORDER,
                "reorder",
                &[true, true, true, true, false, false, false],
            )?,
            density: build(
                "density",
                shaders::DENSITY,
                "compute_density",
                &[true, true, true, false],
            )?,
            pressure: build(
                "pressure",
                shaders::PRESSURE,
                "compute_pressure",
                &[true, true, true, true, true, true, false],
            )?,
            viscosity: build(
                "viscosity",
                shaders::VISCOSITY,
                "compute_viscosity",
                &[true, true, true, true, true, true, false],
            )?,
            copy_back: build(
                "copy_back",
                shaders::COPY_BACK,
                "copy_back",
                &[true, true, true, false, false],
            )?,
            collision: build(
                "collision",
                shaders::COLLISION,
                "update_positions",
                &[false, false, true, false, false, true, true],
            )?,
        })
    }
}

struct StepBindGroups {
    forces: wgpu::BindGroup,
    reorder: wgpu::BindGroup,
    density: wgpu::BindGroup,
    pressure: wgpu::BindGroup,
    viscosity: wgpu::BindGroup,
    copy_back: wgpu::BindGroup,
    collision: wgpu::BindGroup,
}

pub struct SimulationStepper {
    store: ParticleStore,
    hash: GpuSpatialHash,
    obstacles: ObstacleUploader,
    params_buffer: wgpu::Buffer,
    species_buffer: wgpu::Buffer,
    species_count: u32,
    pipelines: StepPipelines,
    bind_groups: Option<StepBindGroups>,
    /// (store generation, obstacle generation) the bind groups were built for.
    bound: Option<(u64, u64)>,
    /// Store generation the hash positions are bound to.
    hash_bound: Option<u64>,
    /// Particle count written by the last `prepare`.
    prepared: u32,
}

impl SimulationStepper {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        store: ParticleStore,
        hash: GpuSpatialHash,
        obstacles: ObstacleUploader,
        species: &[SpeciesParams],
    ) -> Result<Self, GpuError> {
        let table: Vec<SpeciesGpu> = species.iter().map(SpeciesGpu::from).collect();
        let species_buffer = storage_buffer(
            device,
            "Species Table",
            (table.len() * std::mem::size_of::<SpeciesGpu>()) as u64,
        );
        if !table.is_empty() {
            queue.write_buffer(&species_buffer, 0, bytemuck::cast_slice(&table));
        }

        Ok(Self {
            store,
            hash,
            obstacles,
            params_buffer: uniform_buffer(
                device,
                "Sim Params",
                std::mem::size_of::<SimParams>() as u64,
            ),
            species_buffer,
            species_count: table.len().max(1) as u32,
            pipelines: StepPipelines::new(device)?,
            bind_groups: None,
            bound: None,
            hash_bound: None,
            prepared: 0,
        })
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParticleStore {
        &mut self.store
    }

    pub fn obstacles(&self) -> &ObstacleUploader {
        &self.obstacles
    }

    pub fn obstacles_mut(&mut self) -> &mut ObstacleUploader {
        &mut self.obstacles
    }

    pub fn hash(&self) -> &GpuSpatialHash {
        &self.hash
    }

    /// Rebind after reallocations and write this step's uniforms. Returns
    /// the particle count the step will run over.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        inputs: &StepInputs,
        kernels: &KernelCoefficients,
    ) -> Result<u32, GpuError> {
        self.rebind(device)?;

        let n = self.store.live();
        let counts = SceneCounts {
            obstacles: self.obstacles.obstacle_count(),
            force_zones: self.obstacles.zone_count(),
            species: self.species_count,
        };
        let params = SimParams::new(n, inputs, kernels, counts);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        self.prepared = self.hash.prepare(queue, n, kernels.radius);
        Ok(self.prepared)
    }

    fn rebind(&mut self, device: &wgpu::Device) -> Result<(), GpuError> {
        let store_generation = self.store.generation();
        if self.store.capacity() > self.hash.capacity() {
            self.hash = GpuSpatialHash::new(device, self.store.capacity())?;
            self.hash_bound = None;
            self.bound = None;
        }
        if self.hash_bound != Some(store_generation) {
            self.hash.bind(device, &self.store.predicted);
            self.hash_bound = Some(store_generation);
        }

        let generations = (store_generation, self.obstacles.generation());
        if self.bound == Some(generations) && self.bind_groups.is_some() {
            return Ok(());
        }

        let s = &self.store;
        let h = &self.hash;
        let o = &self.obstacles;
        let p = &self.pipelines;
        let params = &self.params_buffer;
        let species = &self.species_buffer;
        self.bind_groups = Some(StepBindGroups {
            forces: bind_buffers(
                device,
                "External Forces Bind Group",
                &p.forces.1,
                &[params, &s.positions, &s.velocities, &s.predicted, &s.gravity_scales, &s.attribution, &o.zones],
            ),
            reorder: bind_buffers(
                device,
                "Reorder Bind Group",
                &p.reorder.1,
                &[
                    params,
                    &h.items,
                    &s.predicted,
                    &s.velocities,
                    &s.species,
                    &s.sorted_positions,
                    &s.sorted_velocities,
                    &s.sorted_species,
                ],
            ),
            density: bind_buffers(
                device,
                "Density Bind Group",
                &p.density.1,
                &[params, &s.sorted_positions, &h.keys, &h.offsets, &s.sorted_densities],
            ),
            pressure: bind_buffers(
                device,
                "Pressure Bind Group",
                &p.pressure.1,
                &[
                    params,
                    &s.sorted_positions,
                    &h.keys,
                    &h.offsets,
                    &s.sorted_densities,
                    &s.sorted_species,
                    species,
                    &s.sorted_velocities,
                ],
            ),
            viscosity: bind_buffers(
                device,
                "Viscosity Bind Group",
                &p.viscosity.1,
                &[
                    params,
                    &s.sorted_positions,
                    &h.keys,
                    &h.offsets,
                    &s.sorted_velocities,
                    &s.sorted_species,
                    species,
                    &s.sorted_velocities_out,
                ],
            ),
            copy_back: bind_buffers(
                device,
                "Copy Back Bind Group",
                &p.copy_back.1,
                &[
                    params,
                    &h.items,
                    &s.sorted_velocities_out,
                    &s.sorted_densities,
                    &s.velocities,
                    &s.densities,
                ],
            ),
            collision: bind_buffers(
                device,
                "Collision Bind Group",
                &p.collision.1,
                &[
                    params,
                    &s.positions,
                    &s.velocities,
                    &s.species,
                    &s.attribution,
                    &s.removal,
                    &o.obstacles,
                    &o.vertices,
                ],
            ),
        });
        self.bound = Some(generations);
        log::debug!(
            "Step bind groups rebuilt (store gen {}, obstacle gen {})",
            generations.0,
            generations.1
        );
        Ok(())
    }

    /// Record one sub-step. Call [`SimulationStepper::prepare`] first; a
    /// step over zero particles records nothing.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let Some(groups) = &self.bind_groups else {
            log::warn!("Step encoded before prepare");
            return;
        };
        let n = self.prepared;
        if n == 0 {
            return;
        }
        for stage in PIPELINE {
            self.encode_stage(stage, groups, encoder, n);
        }
    }

    fn encode_stage(
        &self,
        stage: StepStage,
        groups: &StepBindGroups,
        encoder: &mut wgpu::CommandEncoder,
        n: u32,
    ) {
        let p = &self.pipelines;
        let (pipeline, bind_group) = match stage {
            StepStage::ExternalForces => (&p.forces.0, &groups.forces),
            StepStage::HashRebuild => {
                self.hash.encode(encoder, n);
                return;
            }
            StepStage::Reorder => (&p.reorder.0, &groups.reorder),
            StepStage::Density => (&p.density.0, &groups.density),
            StepStage::Pressure => (&p.pressure.0, &groups.pressure),
            StepStage::Viscosity => (&p.viscosity.0, &groups.viscosity),
            StepStage::CopyBack => (&p.copy_back.0, &groups.copy_back),
            StepStage::PositionUpdate => (&p.collision.0, &groups.collision),
        };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups(n), 1, 1);
    }
}
