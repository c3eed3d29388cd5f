//! `#[repr(C)]` structs uploaded to uniform and storage buffers.
//!
//! Layouts mirror the WGSL declarations in `shaders/common.wgsl`. All fields
//! are 4-byte scalars so no implicit padding appears on either side.

use bytemuck::{Pod, Zeroable};
use sim::obstacle::{ForceZoneRecord, ObstacleRecord};
use sim::solver::StepInputs;
use sim::{KernelCoefficients, SpeciesParams};

/// Per-step uniform read by every physics pass (96 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub num_particles: u32,
    pub dt: f32,
    pub gravity: f32,
    pub smoothing_radius: f32,

    pub sqr_radius: f32,
    pub poly6: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3: f32,

    pub spiky_pow2_derivative: f32,
    pub spiky_pow3_derivative: f32,
    pub collision_damping: f32,
    pub prediction_factor: f32,

    pub bounds_half_x: f32,
    pub bounds_half_y: f32,
    pub bounds_center_x: f32,
    pub bounds_center_y: f32,

    pub interaction_x: f32,
    pub interaction_y: f32,
    pub interaction_radius: f32,
    /// Zero when no interaction is active.
    pub interaction_strength: f32,

    pub num_obstacles: u32,
    pub num_force_zones: u32,
    pub num_species: u32,
    pub particle_radius: f32,
}

impl SimParams {
    pub fn new(
        num_particles: u32,
        inputs: &StepInputs,
        kernels: &KernelCoefficients,
        counts: SceneCounts,
    ) -> Self {
        let (interaction_point, interaction_strength) = inputs
            .interaction
            .map_or((glam::Vec2::ZERO, 0.0), |i| (i.point, i.strength));
        Self {
            num_particles,
            dt: inputs.dt,
            gravity: inputs.gravity,
            smoothing_radius: kernels.radius,
            sqr_radius: kernels.sqr_radius,
            poly6: kernels.poly6,
            spiky_pow2: kernels.spiky_pow2,
            spiky_pow3: kernels.spiky_pow3,
            spiky_pow2_derivative: kernels.spiky_pow2_derivative,
            spiky_pow3_derivative: kernels.spiky_pow3_derivative,
            collision_damping: inputs.collision_damping,
            prediction_factor: inputs.prediction_factor,
            bounds_half_x: inputs.bounds_half.x,
            bounds_half_y: inputs.bounds_half.y,
            bounds_center_x: inputs.bounds_center.x,
            bounds_center_y: inputs.bounds_center.y,
            interaction_x: interaction_point.x,
            interaction_y: interaction_point.y,
            interaction_radius: inputs.interaction_radius,
            interaction_strength,
            num_obstacles: counts.obstacles,
            num_force_zones: counts.force_zones,
            num_species: counts.species,
            particle_radius: inputs.particle_radius,
        }
    }
}

/// Table sizes the physics passes loop over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneCounts {
    pub obstacles: u32,
    pub force_zones: u32,
    pub species: u32,
}

/// Equation-of-state constants of one species (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpeciesGpu {
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
}

impl From<&SpeciesParams> for SpeciesGpu {
    fn from(s: &SpeciesParams) -> Self {
        Self {
            target_density: s.target_density,
            pressure_multiplier: s.pressure_multiplier,
            near_pressure_multiplier: s.near_pressure_multiplier,
            viscosity_strength: s.viscosity_strength,
        }
    }
}

/// Flattened obstacle (32 bytes). Vertices live in a separate array.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ObstacleGpu {
    pub centroid_x: f32,
    pub centroid_y: f32,
    pub width: f32,
    /// 0 agent, 1 static, 2 drain
    pub kind: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub absorbs: u32,
    pub color: u32,
}

impl From<&ObstacleRecord> for ObstacleGpu {
    fn from(r: &ObstacleRecord) -> Self {
        Self {
            centroid_x: r.centroid.x,
            centroid_y: r.centroid.y,
            width: r.width,
            kind: r.kind.tag(),
            vertex_start: r.vertex_start,
            vertex_count: r.vertex_count,
            absorbs: r.absorbs,
            color: r.color,
        }
    }
}

/// Force zone (32 bytes). Gravity wells use `a` as the centre.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ForceZoneGpu {
    pub kind: u32,
    pub radius: f32,
    pub strength: f32,
    pub _pad: u32,
    pub a_x: f32,
    pub a_y: f32,
    pub b_x: f32,
    pub b_y: f32,
}

impl From<&ForceZoneRecord> for ForceZoneGpu {
    fn from(z: &ForceZoneRecord) -> Self {
        Self {
            kind: z.kind,
            radius: z.radius,
            strength: z.strength,
            _pad: 0,
            a_x: z.a.x,
            a_y: z.a.y,
            b_x: z.b.x,
            b_y: z.b.y,
        }
    }
}

/// Uniform of the hash key pass (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashParams {
    pub num_particles: u32,
    pub cell_size: f32,
    pub _pad0: u32,
    pub _pad1: u32,
}

/// Uniform of one digit pass of the counting sort (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SortParams {
    pub num_to_sort: u32,
    /// Bit offset of the digit sorted by this pass.
    pub shift: u32,
    /// Workgroups covering `num_to_sort`, the stride of the digit-major
    /// block counts.
    pub num_blocks: u32,
    pub _pad0: u32,
}

/// Uniform of the prefix sum passes (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ScanParams {
    pub element_count: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub _pad2: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use sim::obstacle::ObstacleLayout;
    use sim::{ForceZone, Interaction, Obstacle, ObstacleKind, SimulationConfig};

    #[test]
    fn struct_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<SimParams>(), 96);
        assert_eq!(std::mem::size_of::<SpeciesGpu>(), 16);
        assert_eq!(std::mem::size_of::<ObstacleGpu>(), 32);
        assert_eq!(std::mem::size_of::<ForceZoneGpu>(), 32);
        assert_eq!(std::mem::size_of::<HashParams>(), 16);
        assert_eq!(std::mem::size_of::<SortParams>(), 16);
        assert_eq!(std::mem::size_of::<ScanParams>(), 16);
    }

    #[test]
    fn missing_interaction_has_zero_strength() {
        let config = SimulationConfig::default();
        let kernels = KernelCoefficients::new_or_default(config.smoothing_radius);
        let idle = StepInputs::new(&config, None, 0.01);
        let params = SimParams::new(10, &idle, &kernels, SceneCounts::default());
        assert_eq!(params.interaction_strength, 0.0);
        assert_eq!(params.smoothing_radius, kernels.radius);

        let pull = Interaction::pull(Vec2::new(1.0, 2.0), &config);
        let active = StepInputs::new(&config, Some(pull), 0.01);
        let params = SimParams::new(10, &active, &kernels, SceneCounts::default());
        assert_eq!(params.interaction_strength, pull.strength);
        assert_eq!((params.interaction_x, params.interaction_y), (1.0, 2.0));
    }

    #[test]
    fn records_keep_kind_tags_and_vertex_ranges() {
        let layout = ObstacleLayout::build(
            &[
                Obstacle::disc(3, ObstacleKind::Drain, Vec2::ZERO, 0.5),
                Obstacle::rect(4, ObstacleKind::Agent, Vec2::ONE, Vec2::ONE).absorbing(0b10),
            ],
            &[ForceZone::GravityWell {
                centre: Vec2::new(2.0, 3.0),
                radius: 1.0,
                strength: 4.0,
            }],
        );
        let gpu: Vec<ObstacleGpu> = layout.records.iter().map(ObstacleGpu::from).collect();
        assert_eq!(gpu[0].kind, 2);
        assert_eq!(gpu[0].width, 1.0);
        assert_eq!((gpu[1].vertex_start, gpu[1].vertex_count), (1, 4));
        assert_eq!(gpu[1].absorbs, 0b10);

        let zone = ForceZoneGpu::from(&layout.zones[0]);
        assert_eq!(zone.kind, 1);
        assert_eq!((zone.a_x, zone.a_y), (2.0, 3.0));
    }
}
