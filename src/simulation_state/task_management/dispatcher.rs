//! # Job Dispatcher
//!
//! Per-tool accounting on top of the worker pool.
//!
//! Every tool owns a [`BatchState`]. Submitting a job bumps the tool's in-flight
//! count *before* the job is queued, so no completion can observe a zero count
//! for a batch that is still being dispatched. Completions are merged one at a
//! time on the simulation thread; the completion that brings the count back to
//! zero settles the batch: each touched field is notified exactly once and the
//! batch's aggregate hit flag is handed back to the tool.

use std::{collections::BTreeMap, time::Duration};

use log::{debug, error, trace};

use super::{
    task::{CompletionContext, JobKind, Task, TaskResult},
    CompletedJob, Job, TaskManager,
};
use crate::simulation_state::{
    structures::CachedBlock,
    tools::ToolMode,
    voxels::{DirtyRange, FieldId, PhaseTimings},
    EntityId,
};

/// In-flight bookkeeping for one tool.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchState {
    generation: u64,
    active_threads: usize,
    working: bool,
    pending: BTreeMap<FieldId, DirtyRange>,
    harvested: BTreeMap<u8, f32>,
    timings: PhaseTimings,
    settled_batches: u64,
    /// Blocks kept by a caching tool, refilled by each gather batch.
    work_set: Vec<CachedBlock>,
}

impl BatchState {
    /// A fresh batch state tagged with `generation`.
    ///
    /// Every tool instance gets its own generation. Results carrying another
    /// generation belong to a tool that has since been replaced.
    pub fn with_generation(generation: u64) -> Self {
        BatchState {
            generation,
            ..BatchState::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Jobs submitted and not yet completed.
    pub fn active_threads(&self) -> usize {
        self.active_threads
    }

    pub fn is_idle(&self) -> bool {
        self.active_threads == 0
    }

    /// Whether anything in the current batch has hit so far.
    pub fn working(&self) -> bool {
        self.working
    }

    /// Records a synchronous hit (instant damage) in the current batch.
    pub fn mark_working(&mut self) {
        self.working = true;
    }

    /// Reads and clears the hit flag once the outcome has been published.
    pub fn take_working(&mut self) -> bool {
        std::mem::take(&mut self.working)
    }

    /// Dirty ranges waiting for the batch to settle.
    pub fn pending(&self) -> &BTreeMap<FieldId, DirtyRange> {
        &self.pending
    }

    /// Total harvested per material over the tool's lifetime.
    pub fn harvested(&self) -> &BTreeMap<u8, f32> {
        &self.harvested
    }

    /// Carve phase timings accumulated over the tool's lifetime.
    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    pub fn settled_batches(&self) -> u64 {
        self.settled_batches
    }

    pub fn work_set(&self) -> &[CachedBlock] {
        &self.work_set
    }

    /// Drops cached blocks that are gone or have nothing left to do in `mode`.
    ///
    /// # Returns
    /// How many blocks remain.
    pub fn prune_work_set(&mut self, mode: ToolMode) -> usize {
        self.work_set.retain(|cached| cached.is_workable(mode));
        self.work_set.len()
    }

    pub fn clear_work_set(&mut self) {
        self.work_set.clear();
    }
}

/// Handed back when the last job of a batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledBatch {
    /// Whether anything in the batch hit.
    pub working: bool,
    /// Fields notified of changes.
    pub fields_notified: usize,
}

/// Submits tool jobs and merges their results back into each tool's batch.
pub struct JobDispatcher {
    tasks: TaskManager,
    submitted: u64,
    completed: u64,
    discarded: u64,
}

impl JobDispatcher {
    /// Creates a dispatcher backed by `num_workers` worker threads (0 runs jobs inline).
    pub fn new(num_workers: usize) -> Self {
        JobDispatcher {
            tasks: TaskManager::new(num_workers),
            submitted: 0,
            completed: 0,
            discarded: 0,
        }
    }

    /// Queues `task` for `tool`, counting it against the tool's batch first.
    pub fn submit(
        &mut self,
        tool: EntityId,
        batch: &mut BatchState,
        kind: JobKind,
        task: Box<dyn Task + Send>,
    ) {
        batch.active_threads += 1;
        self.submitted += 1;
        trace!(
            "Tool {} submitted {:?} job ({} in flight)",
            tool,
            kind,
            batch.active_threads
        );
        self.tasks.publish_task(Job {
            tool,
            generation: batch.generation,
            kind,
            task,
        });
    }

    /// Results that have arrived since the last poll.
    pub fn poll(&mut self) -> Vec<CompletedJob> {
        self.tasks.process_completed_tasks()
    }

    /// Like `poll`, but waits up to `timeout` for at least one result.
    pub fn wait(&mut self, timeout: Duration) -> Vec<CompletedJob> {
        self.tasks.wait_for_completed(timeout)
    }

    /// Hands queued jobs to workers that have freed up.
    pub fn flush(&mut self) {
        self.tasks.process_queued_tasks();
    }

    /// Merges one completed job into its tool's batch.
    ///
    /// # Arguments
    /// * `batch` - The owning tool's batch state
    /// * `result` - The job's result
    /// * `ctx` - Shared simulation state for the merge
    ///
    /// # Returns
    /// `Some` when this completion settled the batch, `None` while jobs remain.
    pub fn complete(
        &mut self,
        batch: &mut BatchState,
        result: Box<dyn TaskResult + Send>,
        ctx: &mut CompletionContext<'_>,
    ) -> Option<SettledBatch> {
        if batch.active_threads == 0 {
            error!("Job completed for a tool with nothing in flight, discarding it");
            self.discard(result, ctx);
            return None;
        }

        let outcome = result.handle_result(ctx);
        batch.active_threads -= 1;
        self.completed += 1;

        batch.working |= outcome.hit;
        if let Some((field, range)) = outcome.dirty {
            batch
                .pending
                .entry(field)
                .and_modify(|pending| *pending = pending.merge(&range))
                .or_insert(range);
        }
        for (material, amount) in outcome.yields {
            *batch.harvested.entry(material).or_insert(0.0) += amount;
        }
        batch.timings.accumulate(&outcome.timings);
        batch.work_set.extend(outcome.blocks);

        if batch.active_threads > 0 {
            return None;
        }

        let pending = std::mem::take(&mut batch.pending);
        let fields_notified = pending.len();
        for (field, range) in pending {
            ctx.regions.region_changed(field, range);
        }
        batch.settled_batches += 1;
        debug!(
            "Batch settled: working={} fields={}",
            batch.working, fields_notified
        );

        Some(SettledBatch {
            working: batch.working,
            fields_notified,
        })
    }

    /// Drops a result whose tool no longer exists.
    pub fn discard(&mut self, result: Box<dyn TaskResult + Send>, ctx: &mut CompletionContext<'_>) {
        self.discarded += 1;
        result.discard(ctx);
    }

    /// Jobs published to the pool and not yet collected.
    pub fn jobs_outstanding(&self) -> usize {
        self.tasks.tasks_outstanding()
    }

    pub fn worker_count(&self) -> usize {
        self.tasks.worker_count()
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.submitted
    }

    pub fn jobs_completed(&self) -> u64 {
        self.completed
    }

    pub fn jobs_discarded(&self) -> u64 {
        self.discarded
    }
}
