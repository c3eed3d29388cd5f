//! The fixed order of one integration step.
//!
//! Both steppers walk [`PIPELINE`] front to back and dispatch on the stage.
//! Physics passes read the neighbour-sorted copies made by `Reorder`, and
//! `CopyBack` returns their results to original particle order before the
//! position update runs.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepStage {
    /// Gravity, interaction and force zones; writes predicted positions.
    ExternalForces,
    /// Cell keys from predicted positions, counting sort, offset table.
    HashRebuild,
    /// Gather particle data into neighbour-sorted scratch buffers.
    Reorder,
    Density,
    Pressure,
    Viscosity,
    /// Scatter sorted velocities and densities back to particle order.
    CopyBack,
    /// Integrate, collide with obstacles and bounds, flag removals.
    PositionUpdate,
}

pub const PIPELINE: [StepStage; 8] = [
    StepStage::ExternalForces,
    StepStage::HashRebuild,
    StepStage::Reorder,
    StepStage::Density,
    StepStage::Pressure,
    StepStage::Viscosity,
    StepStage::CopyBack,
    StepStage::PositionUpdate,
];

impl StepStage {
    pub const fn label(self) -> &'static str {
        match self {
            StepStage::ExternalForces => "External Forces",
            StepStage::HashRebuild => "Hash Rebuild",
            StepStage::Reorder => "Reorder",
            StepStage::Density => "Density",
            StepStage::Pressure => "Pressure",
            StepStage::Viscosity => "Viscosity",
            StepStage::CopyBack => "Copy Back",
            StepStage::PositionUpdate => "Position Update",
        }
    }

    /// Stages that read the neighbour-sorted scratch buffers.
    pub const fn reads_sorted(self) -> bool {
        matches!(
            self,
            StepStage::Density | StepStage::Pressure | StepStage::Viscosity | StepStage::CopyBack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_is_strictly_ordered() {
        assert!(PIPELINE.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(PIPELINE.first(), Some(&StepStage::ExternalForces));
        assert_eq!(PIPELINE.last(), Some(&StepStage::PositionUpdate));
    }

    #[test]
    fn sorted_stages_sit_between_reorder_and_position_update() {
        for stage in PIPELINE.iter().filter(|s| s.reads_sorted()) {
            assert!(*stage > StepStage::Reorder && *stage < StepStage::PositionUpdate);
        }
    }
}
