//! # Voxel Tasks
//!
//! Asynchronous operations on voxel fields.

pub mod carve_task;
