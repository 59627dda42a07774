//! # Simulation State Module
//!
//! Owns everything tools need for the lifetime of a simulation and runs the
//! per-tick loop.
//!
//! ## Key Components
//!
//! * `SimulationContext` - Tools, voxel fields and the job dispatcher
//! * `geometry` - Poses, boxes, effect volumes and tool placement
//! * `voxels` - Voxel fields and carving
//! * `targeting` - Candidates, relations and filtering
//! * `structures` - Block structures and the gather job
//! * `task_management` - Worker pool and per-tool batch accounting
//! * `triggers` - Trigger state machine and effects
//! * `tools` - Tool definitions, tool state and the per-tick sequence
//!
//! ## Tick
//!
//! 1. Merge every job result that has come back, settling finished batches
//! 2. Update every tool in id order
//! 3. Hand queued jobs to idle workers
//!
//! Everything in a tick runs on the calling thread; only carve and gather jobs
//! run on workers.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    time::Duration,
};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::core::MtResource;

pub mod geometry;
pub mod structures;
pub mod targeting;
pub mod task_management;
pub mod tools;
pub mod triggers;
pub mod voxels;

use structures::DamageSink;
use targeting::{FactionLookup, SpatialQuery};
use task_management::{task::CompletionContext, BatchState, CompletedJob, JobDispatcher};
use tools::{
    update_tool, TickOutcome, ToolDefinitions, ToolError, ToolInstance, ToolSpawn, UpdateContext,
};
use voxels::{FieldId, FieldRegistry, RegionChangeSink, VoxelField};

/// Identity of any world object: tools, grids, characters, voxel fields.
pub type EntityId = u64;

/// Simulation-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Worker threads for carve and gather jobs. Zero runs them inline.
    pub worker_count: usize,
    /// No one is watching: skip the per-tick raycast unless a ray tool needs it.
    pub headless: bool,
    /// Ticks between power checks of block tools.
    pub power_poll_interval: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            worker_count: 4,
            headless: false,
            power_poll_interval: 20,
        }
    }
}

/// The host's side of a tick.
pub struct HostServices<'a> {
    pub spatial: &'a dyn SpatialQuery,
    pub factions: &'a dyn FactionLookup,
    pub damage: &'a mut dyn DamageSink,
    pub regions: &'a mut dyn RegionChangeSink,
}

/// Tools, fields and workers of one running simulation.
///
/// # Examples
///
/// ```
/// use tool_core::simulation_state::{SimulationConfig, SimulationContext};
///
/// let context = SimulationContext::new(SimulationConfig {
///     worker_count: 0,
///     ..SimulationConfig::default()
/// });
/// assert_eq!(context.tick_count(), 0);
/// ```
pub struct SimulationContext {
    config: SimulationConfig,
    tick: u64,
    tools: BTreeMap<EntityId, ToolInstance>,
    fields: FieldRegistry,
    dispatcher: JobDispatcher,
    next_generation: u64,
}

impl SimulationContext {
    pub fn new(config: SimulationConfig) -> Self {
        info!("Starting simulation with {:?}", config);
        let dispatcher = JobDispatcher::new(config.worker_count);
        SimulationContext {
            config,
            tick: 0,
            tools: BTreeMap::new(),
            fields: FieldRegistry::new(),
            dispatcher,
            next_generation: 1,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Creates a tool and adds it to the simulation.
    ///
    /// # Returns
    /// The tool's id, or the reason it couldn't be created. A tool already
    /// registered under the same id is replaced, and results of jobs it still
    /// has in flight are discarded rather than merged into the new tool.
    pub fn add_tool(
        &mut self,
        spawn: ToolSpawn,
        definitions: &ToolDefinitions,
    ) -> Result<EntityId, ToolError> {
        let mut tool = ToolInstance::new(spawn, definitions)?;
        tool.batch = BatchState::with_generation(self.next_generation);
        self.next_generation += 1;
        let id = tool.id();
        match self.tools.entry(id) {
            Entry::Occupied(mut entry) => {
                warn!(
                    "Replacing tool {} ({} job(s) still in flight)",
                    id,
                    entry.get().batch().active_threads()
                );
                entry.insert(tool);
            }
            Entry::Vacant(entry) => {
                entry.insert(tool);
            }
        }
        Ok(id)
    }

    /// Removes a tool. Jobs it still has in flight finish and are discarded.
    pub fn remove_tool(&mut self, id: EntityId) -> Option<ToolInstance> {
        let tool = self.tools.remove(&id)?;
        if !tool.batch().is_idle() {
            debug!(
                "Tool {} removed with {} job(s) in flight",
                id,
                tool.batch().active_threads()
            );
        }
        Some(tool)
    }

    pub fn tool(&self, id: EntityId) -> Option<&ToolInstance> {
        self.tools.get(&id)
    }

    pub fn tool_mut(&mut self, id: EntityId) -> Option<&mut ToolInstance> {
        self.tools.get_mut(&id)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolInstance> {
        self.tools.values()
    }

    /// Tools the effect consumer should look at.
    pub fn av_tools(&self) -> impl Iterator<Item = &ToolInstance> {
        self.tools.values().filter(|tool| tool.is_av_active())
    }

    /// Registers a voxel field, returning its shared handle.
    pub fn add_field(&mut self, field: VoxelField) -> MtResource<VoxelField> {
        self.fields.insert(field)
    }

    /// Unregisters a field. Jobs still carving it finish as stale.
    pub fn remove_field(&mut self, id: FieldId) -> Option<MtResource<VoxelField>> {
        self.fields.remove(id)
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// Runs one simulation tick.
    ///
    /// # Returns
    /// Where each tool's tick stopped, by tool id.
    pub fn tick(&mut self, host: &mut HostServices<'_>) -> BTreeMap<EntityId, TickOutcome> {
        let completed = self.dispatcher.poll();
        self.merge_completed(completed, host);

        let mut outcomes = BTreeMap::new();
        for (id, tool) in self.tools.iter_mut() {
            let mut ctx = UpdateContext {
                tick: self.tick,
                config: &self.config,
                fields: &self.fields,
                dispatcher: &mut self.dispatcher,
                spatial: host.spatial,
                factions: host.factions,
                damage: &mut *host.damage,
            };
            outcomes.insert(*id, update_tool(tool, &mut ctx));
        }

        self.dispatcher.flush();
        self.tick += 1;
        outcomes
    }

    /// Waits for every job in flight and merges the results.
    ///
    /// # Returns
    /// `false` if `timeout` passed first.
    pub fn finish_jobs(&mut self, host: &mut HostServices<'_>, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.dispatcher.jobs_outstanding() > 0 {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(
                    "{} job(s) still outstanding after {:?}",
                    self.dispatcher.jobs_outstanding(),
                    timeout
                );
                return false;
            }
            let completed = self.dispatcher.wait(timeout - elapsed);
            self.merge_completed(completed, host);
        }
        true
    }

    fn merge_completed(&mut self, completed: Vec<CompletedJob>, host: &mut HostServices<'_>) {
        for job in completed {
            let mut ctx = CompletionContext {
                fields: &self.fields,
                damage: &mut *host.damage,
                regions: &mut *host.regions,
            };
            let owner = self
                .tools
                .get_mut(&job.tool)
                .filter(|tool| tool.batch.generation() == job.generation);
            let Some(tool) = owner else {
                trace!(
                    "Discarding {:?} result of removed or replaced tool {}",
                    job.kind,
                    job.tool
                );
                self.dispatcher.discard(job.result, &mut ctx);
                continue;
            };
            if let Some(settled) = self.dispatcher.complete(&mut tool.batch, job.result, &mut ctx) {
                let hitting = tool.finalize_hit(self.tick);
                trace!(
                    "Tool {} batch settled ({} field(s), hitting: {})",
                    job.tool,
                    settled.fields_notified,
                    hitting
                );
            }
        }
    }
}

impl Drop for SimulationContext {
    fn drop(&mut self) {
        let outstanding = self.dispatcher.jobs_outstanding();
        if outstanding > 0 {
            debug!("Simulation dropped with {} job(s) outstanding", outstanding);
        }
    }
}
