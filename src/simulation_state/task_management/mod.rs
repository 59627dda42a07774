//! # Task Management System
//!
//! Runs tool jobs on a pool of worker threads and funnels their results back to
//! the simulation thread.
//!
//! ## Architecture Overview
//!
//! - `TaskManager`: Owns the worker threads, distributes jobs and collects results
//! - `TaskChannel`: The pair of channels connecting the manager to one worker
//! - `Job` / `CompletedJob`: A task (or its result) tagged with the tool it belongs to
//! - `JobDispatcher` (in `dispatcher`): Per-tool in-flight accounting and batch
//!   settlement on top of the manager
//!
//! ## Worker Pool
//!
//! - One `std::thread` per worker, each with a dedicated channel
//! - Round-robin distribution, at most `MAX_TASKS_IN_FLIGHT` jobs per worker
//! - Jobs that find every worker busy wait in a FIFO queue
//! - A worker that panics inside a task reports a failed result instead of
//!   disappearing, so the owning tool still sees the job complete
//! - With zero workers, jobs run inline as they are published; results are
//!   still only handed out by `process_completed_tasks()`
//!
//! ## Job Lifecycle
//! 1. Jobs are published via `TaskManager::publish_task()`
//! 2. The manager hands them to available workers using round-robin
//! 3. Workers process them and send back results
//! 4. `process_completed_tasks()` collects the results on the simulation thread
//! 5. `process_queued_tasks()` moves waiting jobs onto freed workers
//!
//! ## Example Usage
//! ```rust
//! use tool_core::simulation_state::task_management::TaskManager;
//!
//! let mut task_manager = TaskManager::new(2);
//!
//! // In the simulation loop:
//! for completed in task_manager.process_completed_tasks() {
//!     // hand `completed.result` to the dispatcher
//! #   let _ = completed;
//! }
//! task_manager.process_queued_tasks();
//! ```

pub mod dispatcher;
pub mod task;

use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::mpsc::{channel, Receiver, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info};
use web_time::Instant;

use crate::simulation_state::EntityId;
use task::{CompletionContext, JobKind, JobOutcome, Task, TaskResult};

pub use dispatcher::{BatchState, JobDispatcher, SettledBatch};

/// A task on its way to a worker, tagged with the tool that submitted it.
pub struct Job {
    pub tool: EntityId,
    /// Generation of the tool's batch state, so results outliving a replaced
    /// tool aren't merged into its successor.
    pub generation: u64,
    pub kind: JobKind,
    pub task: Box<dyn Task + Send>,
}

/// A finished task on its way back to the simulation thread.
pub struct CompletedJob {
    pub tool: EntityId,
    pub generation: u64,
    pub kind: JobKind,
    pub result: Box<dyn TaskResult + Send>,
}

/// Result reported for a task that panicked on its worker.
struct FailedTask;

impl TaskResult for FailedTask {
    fn handle_result(self: Box<Self>, _ctx: &mut CompletionContext<'_>) -> JobOutcome {
        JobOutcome::stale()
    }
}

/// A communication channel between the simulation thread and one worker.
///
/// # Fields
/// - `task_sender`: Sends jobs to the worker
/// - `result_receiver`: Receives finished jobs from the worker
/// - `num_tasks_in_flight`: Jobs sent but not yet collected
/// - `_worker`: Handle to the worker thread
#[derive(Debug)]
pub struct TaskChannel {
    task_sender: Sender<Job>,
    result_receiver: Receiver<CompletedJob>,
    num_tasks_in_flight: usize,
    _worker: JoinHandle<()>,
}

/// Manages a pool of worker threads and coordinates job execution.
///
/// # Fields
/// - `channels`: Set of active worker channels
/// - `queued_tasks`: Jobs waiting for an available worker
/// - `inline_results`: Results of jobs run inline when there are no workers
/// - `current_channel`: Index for round-robin scheduling
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    queued_tasks: VecDeque<Job>,
    inline_results: VecDeque<CompletedJob>,
    current_channel: usize,
}

/// Maximum number of jobs that can be in flight per worker channel.
///
/// Kept at 1 so a long carve on one worker never has other jobs stuck behind
/// it while another worker sits idle.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

fn run_job(job: Job) -> CompletedJob {
    let result = catch_unwind(AssertUnwindSafe(|| job.task.process())).unwrap_or_else(|_| {
        error!("{:?} job for tool {} panicked on its worker", job.kind, job.tool);
        Box::new(FailedTask)
    });
    CompletedJob {
        tool: job.tool,
        generation: job.generation,
        kind: job.kind,
        result,
    }
}

impl TaskManager {
    /// Creates a new `TaskManager` with the specified number of worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of worker threads to create. Zero runs every
    ///   job inline on the publishing thread.
    ///
    /// # Panics
    /// Panics if the operating system refuses to create a thread.
    pub fn new(num_workers: usize) -> Self {
        let mut channels = Vec::with_capacity(num_workers);

        info!(
            "Starting {} tool workers (available parallelism: {:?})",
            num_workers,
            thread::available_parallelism()
        );

        for _ in 0..num_workers {
            let (task_tx, task_rx) = channel::<Job>();
            let (result_tx, result_rx) = channel::<CompletedJob>();

            let worker = thread::spawn(move || {
                while let Ok(job) = task_rx.recv() {
                    if result_tx.send(run_job(job)).is_err() {
                        break;
                    }
                }
            });

            channels.push(TaskChannel {
                task_sender: task_tx,
                result_receiver: result_rx,
                num_tasks_in_flight: 0,
                _worker: worker,
            });
        }

        TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            inline_results: VecDeque::new(),
            current_channel: 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    /// Attempts to send a job to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the job was handed to the worker
    /// - `Err(job)` if the worker has gone away, so the job can be requeued
    fn try_send_task(&mut self, job: Job, channel_idx: usize) -> Result<(), Job> {
        match self.channels[channel_idx].task_sender.send(job) {
            Ok(_) => {
                self.channels[channel_idx].num_tasks_in_flight += 1;
                Ok(())
            }
            Err(failed) => Err(failed.0),
        }
    }

    /// Finds an available worker channel, round-robin from the last one used.
    ///
    /// # Returns
    /// - `Some(usize)` index of a channel below `MAX_TASKS_IN_FLIGHT`
    /// - `None` if every channel is busy or there are none
    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }

        let count = self.channels.len();
        (0..count)
            .map(|offset| (self.current_channel + offset) % count)
            .find(|&idx| self.channels[idx].num_tasks_in_flight < MAX_TASKS_IN_FLIGHT)
    }

    /// Publishes a new job for execution.
    ///
    /// # Returns
    /// - `true` if the job was handed to a worker (or run inline)
    /// - `false` if it was queued because every worker is busy
    pub fn publish_task(&mut self, job: Job) -> bool {
        if self.channels.is_empty() {
            let completed = run_job(job);
            self.inline_results.push_back(completed);
            return true;
        }

        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(job, channel_idx) {
                Ok(_) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(job) => {
                    self.queued_tasks.push_back(job);
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(job);
                false
            }
        }
    }

    /// Moves queued jobs onto workers that have room, oldest first.
    ///
    /// Stops at the first job that can't be placed.
    pub fn process_queued_tasks(&mut self) {
        while !self.queued_tasks.is_empty() {
            let Some(channel_idx) = self.find_available_channel() else {
                break;
            };
            let Some(job) = self.queued_tasks.pop_front() else {
                break;
            };
            match self.try_send_task(job, channel_idx) {
                Ok(_) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(job) => {
                    // Worker disconnected, put the job back and stop
                    error!("Tool worker {} disconnected", channel_idx);
                    self.queued_tasks.push_front(job);
                    break;
                }
            }
        }
    }

    /// Collects every result that has arrived since the last call.
    ///
    /// Must be called on the simulation thread. Results come back in the order
    /// each worker finished them; there is no ordering across workers.
    pub fn process_completed_tasks(&mut self) -> Vec<CompletedJob> {
        let mut completed: Vec<CompletedJob> = self.inline_results.drain(..).collect();
        for channel in &mut self.channels {
            while let Ok(job) = channel.result_receiver.try_recv() {
                channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
                completed.push(job);
            }
        }
        completed
    }

    /// Jobs published but not yet collected.
    pub fn tasks_outstanding(&self) -> usize {
        self.queued_tasks.len()
            + self.inline_results.len()
            + self
                .channels
                .iter()
                .map(|c| c.num_tasks_in_flight)
                .sum::<usize>()
    }

    /// Blocks until at least one result is available, nothing is outstanding,
    /// or `timeout` passes. Queued jobs keep flowing onto workers while waiting.
    pub fn wait_for_completed(&mut self, timeout: Duration) -> Vec<CompletedJob> {
        let start = Instant::now();
        loop {
            let completed = self.process_completed_tasks();
            self.process_queued_tasks();
            if !completed.is_empty() || self.tasks_outstanding() == 0 || start.elapsed() >= timeout
            {
                return completed;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(u32);
    struct EchoResult;

    impl Task for Echo {
        fn process(&self) -> Box<dyn TaskResult + Send> {
            if self.0 == 13 {
                panic!("unlucky job");
            }
            Box::new(EchoResult)
        }
    }

    impl TaskResult for EchoResult {
        fn handle_result(self: Box<Self>, _ctx: &mut CompletionContext<'_>) -> JobOutcome {
            JobOutcome {
                hit: true,
                ..JobOutcome::default()
            }
        }
    }

    fn job(tool: EntityId, n: u32) -> Job {
        Job {
            tool,
            generation: 0,
            kind: JobKind::Carve,
            task: Box::new(Echo(n)),
        }
    }

    fn collect_all(manager: &mut TaskManager, expected: usize) -> Vec<CompletedJob> {
        let mut done = Vec::new();
        while done.len() < expected {
            let batch = manager.wait_for_completed(Duration::from_secs(5));
            assert!(!batch.is_empty(), "workers stopped producing results");
            done.extend(batch);
        }
        done
    }

    #[test]
    fn jobs_beyond_worker_capacity_are_queued_then_run() {
        let mut manager = TaskManager::new(2);
        let placed: Vec<bool> = (0..5).map(|n| manager.publish_task(job(7, n))).collect();

        assert_eq!(placed.iter().filter(|p| **p).count(), 2);
        assert_eq!(manager.tasks_outstanding(), 5);

        let done = collect_all(&mut manager, 5);
        assert!(done.iter().all(|c| c.tool == 7));
        assert_eq!(manager.tasks_outstanding(), 0);
    }

    #[test]
    fn zero_workers_run_inline() {
        let mut manager = TaskManager::new(0);
        assert!(manager.publish_task(job(1, 0)));
        assert_eq!(manager.tasks_outstanding(), 1);

        let done = manager.process_completed_tasks();
        assert_eq!(done.len(), 1);
        assert_eq!(manager.tasks_outstanding(), 0);
    }

    #[test]
    fn panicking_task_still_reports_back() {
        let mut manager = TaskManager::new(1);
        manager.publish_task(job(3, 13));
        manager.publish_task(job(3, 1));

        let done = collect_all(&mut manager, 2);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].tool, 3);
    }
}
