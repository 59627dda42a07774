//! # Task System Core Traits
//!
//! This module defines the building blocks every asynchronous tool job is made of.
//!
//! ## Core Components
//! - `Task`: A unit of work executed on a worker thread
//! - `TaskResult`: The result of a task, merged back on the simulation thread
//! - `CompletionContext`: The shared state a result may touch while it is merged
//! - `JobOutcome`: What a merged result contributes to its tool's batch
//!
//! ## Task Lifecycle
//! 1. A `Task` is submitted through `JobDispatcher::submit()`, which counts it
//!    against the owning tool before it is queued
//! 2. The task's `process()` method is called on a worker thread
//! 3. The task returns a boxed `TaskResult`
//! 4. On the simulation thread the result's `handle_result()` produces a
//!    `JobOutcome`, or `discard()` is called if the tool is gone
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred to a worker
//! - `TaskResult` must be `Send` to be transferred back to the simulation thread
//! - Shared data reached from `process()` must be synchronized (voxel fields are
//!   behind `MtResource`)

use std::collections::BTreeMap;

use crate::simulation_state::{
    structures::{CachedBlock, DamageSink},
    voxels::{DirtyRange, FieldId, FieldRegistry, PhaseTimings, RegionChangeSink},
};

/// The two kinds of asynchronous work a tool dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Carve a voxel field.
    Carve,
    /// Gather and work the blocks of a structure.
    Gather,
}

/// A trait representing a unit of work that can be executed asynchronously.
///
/// Tasks should own (or hold shared handles to) everything they need so they
/// can run without touching simulation state.
pub trait Task: Send {
    /// Processes the task on a worker thread and returns its result.
    ///
    /// # Implementation Notes
    /// - Must not assume anything about which worker runs it
    /// - Should handle errors internally and report them through the result
    fn process(&self) -> Box<dyn TaskResult + Send>;
}

/// Shared state a result may read or notify while it is merged.
pub struct CompletionContext<'a> {
    pub fields: &'a FieldRegistry,
    pub damage: &'a mut dyn DamageSink,
    pub regions: &'a mut dyn RegionChangeSink,
}

/// What one completed job contributes to its tool's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    /// The job found something to work on.
    pub hit: bool,
    /// Cells the job changed, by field.
    pub dirty: Option<(FieldId, DirtyRange)>,
    /// Harvested amount per material.
    pub yields: BTreeMap<u8, f32>,
    pub timings: PhaseTimings,
    /// Blocks worked, reported only by tools that cache them.
    pub blocks: Vec<CachedBlock>,
}

impl JobOutcome {
    /// Outcome of a job whose target disappeared before it completed.
    pub fn stale() -> Self {
        JobOutcome::default()
    }
}

/// A trait representing the result of processing a `Task`.
///
/// Results are merged on the simulation thread, one at a time, so they may
/// freely use the `CompletionContext`. Keep them cheap: the heavy lifting
/// belongs in `Task::process()`.
pub trait TaskResult: Send {
    /// Merges the result while its tool still exists.
    ///
    /// # Arguments
    /// * `ctx` - Shared simulation state
    ///
    /// # Returns
    /// The outcome to fold into the tool's current batch. A result whose target
    /// went away returns `JobOutcome::stale()`.
    fn handle_result(self: Box<Self>, ctx: &mut CompletionContext<'_>) -> JobOutcome;

    /// Called instead of `handle_result` when the owning tool was removed
    /// while the job was in flight. Does nothing by default.
    fn discard(self: Box<Self>, ctx: &mut CompletionContext<'_>) {
        let _ = ctx;
    }
}
