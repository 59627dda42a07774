#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Tool Core
//!
//! Simulation of tool devices (drills, grinders and welders) that repeatedly
//! place an effect volume in the world, find what it overlaps, carve voxel
//! fields and work structures on a worker pool, and drive a trigger state
//! machine that tells an effect consumer what to play.
//!
//! ## Key Modules
//!
//! * `core` - Concurrency primitives shared by the rest of the crate
//! * `simulation_state` - Tools, voxel fields, targeting, jobs and triggers
//! * `demo` - An in-memory host and a scripted scene
//!
//! ## Architecture
//!
//! The crate owns no world. Everything about the world comes through traits
//! the host implements:
//! * `SpatialQuery` for the broad phase and raycasts
//! * `FactionLookup` for target relations
//! * `DamageSink` and `RegionChangeSink` for the results of work
//!
//! One simulation thread runs every tool's tick and merges every job result.
//! Only carve and gather jobs run on workers.
//!
//! ## Usage
//!
//! ```rust
//! use tool_core::simulation_state::{tools::load_json, SimulationConfig, SimulationContext};
//!
//! let definitions = load_json(r#"{ "name": "Drill", "modes": [{ "radius": 2.0 }] }"#).unwrap();
//! let context = SimulationContext::new(SimulationConfig {
//!     worker_count: 0,
//!     ..SimulationConfig::default()
//! });
//! assert_eq!(definitions.modes.len(), 1);
//! assert_eq!(context.tools().count(), 0);
//! ```

use log::{error, info};

use simulation_state::{tools::load_json, SimulationConfig};

pub mod core;
pub mod demo;
pub mod simulation_state;

const DEMO_DRILL_TICKS: u64 = 200;
const DEMO_GRIND_TICKS: u64 = 100;
const DEMO_SEED: u64 = 0x5eed;

/// Runs the demo scene headless and logs what the tool did.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let definitions = match load_json(demo::DRILL_DEFINITIONS) {
        Ok(definitions) => definitions,
        Err(e) => {
            error!("Couldn't load the demo tool: {}", e);
            return;
        }
    };

    let config = SimulationConfig {
        headless: true,
        ..SimulationConfig::default()
    };
    let mut scene = match demo::DemoScene::new(config, &definitions, DEMO_SEED) {
        Ok(scene) => scene,
        Err(e) => {
            error!("Couldn't build the demo scene: {}", e);
            return;
        }
    };

    let summary = scene.run(DEMO_DRILL_TICKS, DEMO_GRIND_TICKS);
    info!(
        "{} ticks: {} of {} voxels left, {} region update(s), {} block work item(s), {} entity hit(s)",
        summary.ticks,
        summary.solid_after,
        summary.solid_before,
        summary.regions_changed,
        summary.blocks_worked,
        summary.entities_damaged
    );
    for (material, amount) in &summary.harvested {
        info!("Harvested {:.2} of material {}", amount, material);
    }
}
