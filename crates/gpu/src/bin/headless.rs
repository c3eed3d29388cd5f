//! Headless fluid runner.
//!
//! Usage: slick-headless [scene.json] [--frames N] [--cpu] [--report out.json]
//!
//! A scene file is a JSON object with a `config` (SimulationConfig) and
//! optional `obstacles` and `force_zones` arrays. Without a scene the default
//! configuration with a single water region is used. `--cpu` runs the rayon
//! stepper instead of the GPU; the GPU path falls back to it when no adapter
//! is available.

use std::path::Path;

use glam::Vec2;
use gpu::{FluidSimulation, GpuContext};
use sim::{CpuSimulation, ForceZone, Obstacle, RemovalTally, SimulationConfig, SpawnRegion};

struct Scene {
    config: SimulationConfig,
    obstacles: Vec<Obstacle>,
    force_zones: Vec<ForceZone>,
}

fn load_scene(path: &Path) -> Result<Scene, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let mut value: serde_json::Value = serde_json::from_str(&text)?;
    let mut take = |key: &str| value.get_mut(key).map(serde_json::Value::take);
    let config: SimulationConfig = match take("config") {
        Some(v) => serde_json::from_value(v)?,
        None => SimulationConfig::default(),
    };
    config.validate()?;
    let obstacles = match take("obstacles") {
        Some(v) => serde_json::from_value(v)?,
        None => Vec::new(),
    };
    let force_zones = match take("force_zones") {
        Some(v) => serde_json::from_value(v)?,
        None => Vec::new(),
    };
    Ok(Scene {
        config,
        obstacles,
        force_zones,
    })
}

fn default_scene() -> Scene {
    Scene {
        config: SimulationConfig {
            spawn_regions: vec![SpawnRegion::new(Vec2::new(0.0, 2.0), Vec2::new(6.0, 3.0), 0)
                .with_initial_density(120.0)],
            ..Default::default()
        },
        obstacles: Vec::new(),
        force_zones: Vec::new(),
    }
}

enum Runner {
    Gpu(Box<FluidSimulation>),
    Cpu(Box<CpuSimulation>),
}

impl Runner {
    fn update(&mut self, frame_dt: f32) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Runner::Gpu(sim) => sim.update(frame_dt)?,
            Runner::Cpu(sim) => sim.update(frame_dt),
        }
        Ok(())
    }

    fn particle_count(&self) -> usize {
        match self {
            Runner::Gpu(sim) => sim.particle_count(),
            Runner::Cpu(sim) => sim.particle_count(),
        }
    }

    fn tally(&self) -> &RemovalTally {
        match self {
            Runner::Gpu(sim) => sim.removal_tally(),
            Runner::Cpu(sim) => sim.removal_tally(),
        }
    }

    fn backend(&self) -> &'static str {
        match self {
            Runner::Gpu(_) => "gpu",
            Runner::Cpu(_) => "cpu",
        }
    }
}

fn build_runner(scene: Scene, force_cpu: bool) -> Result<Runner, Box<dyn std::error::Error>> {
    if !force_cpu {
        match GpuContext::new_blocking() {
            Ok(context) => {
                let mut sim = FluidSimulation::new(&context, scene.config)?;
                sim.set_obstacles(&scene.obstacles);
                sim.set_force_zones(&scene.force_zones);
                return Ok(Runner::Gpu(Box::new(sim)));
            }
            Err(e) => log::warn!("GPU unavailable ({}), using the CPU stepper", e),
        }
    }
    let mut sim = CpuSimulation::new(scene.config)?;
    sim.set_obstacles(&scene.obstacles);
    sim.set_force_zones(&scene.force_zones);
    Ok(Runner::Cpu(Box::new(sim)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let force_cpu = args.iter().any(|a| a == "--cpu");
    let value_of = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let frames: u32 = match value_of("--frames") {
        Some(v) => v.parse()?,
        None => 600,
    };
    let report = value_of("--report");
    let scene_path = args
        .iter()
        .enumerate()
        .find(|(i, a)| {
            !a.starts_with("--")
                && (*i == 0 || !matches!(args[i - 1].as_str(), "--frames" | "--report"))
        })
        .map(|(_, a)| a.clone());

    let scene = match &scene_path {
        Some(path) => load_scene(Path::new(path))?,
        None => default_scene(),
    };

    let mut runner = build_runner(scene, force_cpu)?;
    log::info!(
        "Running {} frames on the {} backend, {} particles",
        frames,
        runner.backend(),
        runner.particle_count()
    );

    let frame_dt = 1.0 / 60.0;
    let started = std::time::Instant::now();
    for frame in 0..frames {
        runner.update(frame_dt)?;
        if frame % 60 == 0 {
            log::info!("frame {}: {} particles", frame, runner.particle_count());
        }
    }
    let elapsed = started.elapsed();

    let tally = runner.tally();
    let by_obstacle: serde_json::Map<String, serde_json::Value> = tally
        .obstacles()
        .map(|(id, n)| (id.to_string(), serde_json::json!(n)))
        .collect();
    let summary = serde_json::json!({
        "backend": runner.backend(),
        "frames": frames,
        "seconds": elapsed.as_secs_f64(),
        "particles": runner.particle_count(),
        "removed": tally.total(),
        "by_obstacle": by_obstacle,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(path) = report {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    }
    Ok(())
}
