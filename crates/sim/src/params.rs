//! Simulation parameters and precomputed kernel coefficients.
//!
//! `SimulationConfig` is the persisted, user-tunable description of a
//! simulation. It is loaded from JSON by the embedding application and
//! validated once before any particle exists.

use std::f32::consts::PI;
use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::spawn::SpawnRegion;

/// Physical constants of one particle species.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesParams {
    pub name: String,
    /// Rest density the pressure term drives towards.
    pub target_density: f32,
    pub pressure_multiplier: f32,
    /// Strength of the short-range anti-clustering term.
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    /// RGBA, consumed by renderers only.
    pub color: [u8; 4],
}

impl SpeciesParams {
    pub fn water() -> Self {
        Self {
            name: "water".to_string(),
            target_density: 55.0,
            pressure_multiplier: 500.0,
            near_pressure_multiplier: 18.0,
            viscosity_strength: 0.06,
            color: [70, 160, 255, 255],
        }
    }

    /// Thin, runny oil: lighter than water.
    pub fn light_oil() -> Self {
        Self {
            name: "light_oil".to_string(),
            target_density: 40.0,
            pressure_multiplier: 400.0,
            near_pressure_multiplier: 15.0,
            viscosity_strength: 0.2,
            color: [230, 190, 60, 255],
        }
    }

    /// Thick crude: denser and far more viscous.
    pub fn crude_oil() -> Self {
        Self {
            name: "crude_oil".to_string(),
            target_density: 70.0,
            pressure_multiplier: 450.0,
            near_pressure_multiplier: 20.0,
            viscosity_strength: 0.35,
            color: [40, 30, 25, 255],
        }
    }

    #[inline]
    pub fn pressure_from_density(&self, density: f32) -> f32 {
        (density - self.target_density) * self.pressure_multiplier
    }

    #[inline]
    pub fn near_pressure_from_density(&self, near_density: f32) -> f32 {
        near_density * self.near_pressure_multiplier
    }
}

/// Cursor / control-point interaction for the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interaction {
    pub point: Vec2,
    /// Positive pulls particles in, negative pushes them away.
    pub strength: f32,
}

impl Interaction {
    /// Pull towards `point` with the configured strength.
    pub fn pull(point: Vec2, config: &SimulationConfig) -> Self {
        Self {
            point,
            strength: config.interaction_strength,
        }
    }

    pub fn push(point: Vec2, config: &SimulationConfig) -> Self {
        Self {
            point,
            strength: -config.interaction_strength,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub gravity: f32,
    /// Kernel support radius, also the spatial hash cell size.
    pub smoothing_radius: f32,
    /// Fraction of normal velocity kept after a wall or obstacle bounce.
    pub collision_damping: f32,
    /// Look-ahead used for the predicted positions (seconds).
    pub prediction_factor: f32,
    /// Skin kept between a particle and an obstacle after push-out.
    pub particle_radius: f32,
    pub bounds_size: Vec2,
    pub bounds_center: Vec2,
    pub iterations_per_frame: u32,
    pub time_scale: f32,
    /// Caps the frame delta at 1/fps. Zero disables the cap.
    pub max_timestep_fps: f32,
    /// Hard ceiling on the particle count.
    pub max_particles: u32,
    /// Starting size of the device particle arena.
    pub initial_capacity: u32,
    pub interaction_radius: f32,
    pub interaction_strength: f32,
    pub seed: u64,
    pub species: Vec<SpeciesParams>,
    pub spawn_regions: Vec<SpawnRegion>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            gravity: -12.0,
            smoothing_radius: 0.35,
            collision_damping: 0.95,
            prediction_factor: 1.0 / 120.0,
            particle_radius: 0.05,
            bounds_size: Vec2::new(17.1, 9.3),
            bounds_center: Vec2::ZERO,
            iterations_per_frame: 3,
            time_scale: 1.0,
            max_timestep_fps: 60.0,
            max_particles: 16_384,
            initial_capacity: 1024,
            interaction_radius: 2.0,
            interaction_strength: 90.0,
            seed: 0x51_1c_4a,
            species: vec![
                SpeciesParams::water(),
                SpeciesParams::light_oil(),
                SpeciesParams::crude_oil(),
            ],
            spawn_regions: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Checks the fatal configuration errors. A bad smoothing radius is not
    /// one of them; see [`KernelCoefficients::update`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.species.is_empty() {
            return Err(ConfigError::Invalid("at least one species is required".into()));
        }
        if self.species.len() > 32 {
            return Err(ConfigError::Invalid(format!(
                "{} species configured, absorb masks support at most 32",
                self.species.len()
            )));
        }
        if self.max_particles == 0 {
            return Err(ConfigError::Invalid("max_particles must be non-zero".into()));
        }
        if self.iterations_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "iterations_per_frame must be non-zero".into(),
            ));
        }
        if !(self.bounds_size.x > 0.0 && self.bounds_size.y > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "bounds_size must be positive, got {:?}",
                self.bounds_size
            )));
        }
        for (i, region) in self.spawn_regions.iter().enumerate() {
            if region.species as usize >= self.species.len() {
                return Err(ConfigError::Invalid(format!(
                    "spawn region {} uses species {} but only {} are defined",
                    i,
                    region.species,
                    self.species.len()
                )));
            }
        }
        Ok(())
    }

    /// Duration of one sub-step for a rendered frame of `frame_dt` seconds.
    pub fn sub_step_dt(&self, frame_dt: f32) -> f32 {
        let max_dt = if self.max_timestep_fps > 0.0 {
            1.0 / self.max_timestep_fps
        } else {
            f32::INFINITY
        };
        let dt = (frame_dt * self.time_scale).min(max_dt).max(0.0);
        dt / self.iterations_per_frame.max(1) as f32
    }

    pub fn bounds_half_size(&self) -> Vec2 {
        self.bounds_size * 0.5
    }

    /// Save config to a JSON file.
    pub fn save_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate config from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Kernel normalisation factors for a given smoothing radius.
///
/// Computed once per radius change, never per particle. The 2D forms are:
/// `poly6 = 4/(pi r^8)`, `spiky_pow2 = 6/(pi r^4)`, `spiky_pow3 = 10/(pi r^5)`
/// and their derivatives `12/(pi r^4)`, `30/(pi r^5)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelCoefficients {
    pub radius: f32,
    pub sqr_radius: f32,
    pub poly6: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2_derivative: f32,
    pub spiky_pow3_derivative: f32,
}

impl KernelCoefficients {
    /// Fallback used when a simulation starts with a degenerate radius.
    pub const DEFAULT_RADIUS: f32 = 0.35;

    pub fn try_new(radius: f32) -> Option<Self> {
        if !(radius.is_finite() && radius > 0.0) {
            return None;
        }
        Some(Self::compute(radius))
    }

    fn compute(radius: f32) -> Self {
        let r2 = radius * radius;
        let r4 = r2 * r2;
        let r5 = r4 * radius;
        let r8 = r4 * r4;
        Self {
            radius,
            sqr_radius: r2,
            poly6: 4.0 / (PI * r8),
            spiky_pow2: 6.0 / (PI * r4),
            spiky_pow3: 10.0 / (PI * r5),
            spiky_pow2_derivative: 12.0 / (PI * r4),
            spiky_pow3_derivative: 30.0 / (PI * r5),
        }
    }

    /// Coefficients for `radius`, or for [`Self::DEFAULT_RADIUS`] with a
    /// warning when `radius` is unusable.
    pub fn new_or_default(radius: f32) -> Self {
        let mut coefficients = Self::default();
        coefficients.update(radius);
        coefficients
    }

    /// Recompute for a new radius. Returns false and leaves the previous
    /// coefficients untouched when the radius is zero, negative or NaN.
    pub fn update(&mut self, radius: f32) -> bool {
        match Self::try_new(radius) {
            Some(coefficients) => {
                *self = coefficients;
                true
            }
            None => {
                log::warn!(
                    "Ignoring smoothing radius {} (must be positive), keeping {}",
                    radius,
                    self.radius
                );
                false
            }
        }
    }
}

impl Default for KernelCoefficients {
    fn default() -> Self {
        Self::compute(Self::DEFAULT_RADIUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_species_is_fatal() {
        let config = SimulationConfig {
            species: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn spawn_region_with_unknown_species_is_fatal() {
        let mut config = SimulationConfig::default();
        config.spawn_regions.push(SpawnRegion::new(Vec2::ZERO, Vec2::ONE, 7));
        assert!(config.validate().is_err());
    }

    #[test]
    fn degenerate_radius_keeps_previous_coefficients() {
        let mut k = KernelCoefficients::try_new(0.5).unwrap();
        let before = k;
        assert!(!k.update(0.0));
        assert!(!k.update(-1.0));
        assert!(!k.update(f32::NAN));
        assert_eq!(k, before);
        assert!(k.update(0.25));
        assert_eq!(k.radius, 0.25);
    }

    #[test]
    fn default_matches_try_new() {
        let a = KernelCoefficients::default();
        let b = KernelCoefficients::try_new(KernelCoefficients::DEFAULT_RADIUS).unwrap();
        assert!((a.poly6 - b.poly6).abs() <= b.poly6 * 1e-6);
        assert!((a.spiky_pow3 - b.spiky_pow3).abs() <= b.spiky_pow3 * 1e-6);
    }

    #[test]
    fn sub_step_dt_is_clamped_and_divided() {
        let config = SimulationConfig {
            iterations_per_frame: 4,
            max_timestep_fps: 60.0,
            ..Default::default()
        };
        let dt = config.sub_step_dt(1.0);
        assert!((dt - 1.0 / 240.0).abs() < 1e-7);
        let dt = config.sub_step_dt(1.0 / 120.0);
        assert!((dt - 1.0 / 480.0).abs() < 1e-7);
    }

    #[test]
    fn config_json_roundtrip_keeps_species() {
        let config = SimulationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.species, config.species);
        assert_eq!(loaded.bounds_size, config.bounds_size);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let loaded: SimulationConfig = serde_json::from_str(r#"{ "gravity": -3.0 }"#).unwrap();
        assert_eq!(loaded.gravity, -3.0);
        assert_eq!(loaded.smoothing_radius, 0.35);
        assert_eq!(loaded.species.len(), 3);
    }
}
