//! Slick Simulation Library
//!
//! Multi-species 2D SPH fluid with:
//! - Water and oil species with their own equation-of-state constants
//! - Spatial hash neighbour search built on a stable counting sort
//! - Agent, static and drain obstacles with removal attribution
//! - Spawn regions with fractional rate accumulators
//!
//! This crate is device-agnostic. It owns the data model and a CPU stepper
//! that runs the same pipeline as the `gpu` crate.

pub mod error;
pub mod kernels;
pub mod obstacle;
pub mod params;
pub mod particle;
pub mod pipeline;
pub mod population;
pub mod solver;
pub mod sort;
pub mod spatial_hash;
pub mod spawn;

pub use error::ConfigError;
pub use obstacle::{ForceZone, Obstacle, ObstacleKind, ObstacleLayout};
pub use params::{Interaction, KernelCoefficients, SimulationConfig, SpeciesParams};
pub use particle::{NewParticle, ParticleArrays, RemovalCause};
pub use pipeline::{StepStage, PIPELINE};
pub use population::RemovalTally;
pub use solver::{CpuSimulation, StepEvent};
pub use spatial_hash::SpatialHash;
pub use spawn::{SpawnRegion, Spawner};
