//! # Demo Host
//!
//! A small in-memory host for running tools without an engine: a brute-force
//! spatial index and a scripted scene. The binary and the integration tests
//! both drive tools through it.

pub mod scene;
pub mod world;

pub use scene::{DemoScene, SceneError, SceneSummary, DRILL_DEFINITIONS};
pub use world::DemoWorld;
