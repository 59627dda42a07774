//! # Structure Tasks
//!
//! Asynchronous operations on structural targets.

pub mod gather_task;
