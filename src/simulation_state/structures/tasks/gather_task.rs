//! # Gather Task
//!
//! Collects the blocks of a structure that a tool's volume touches, on a worker,
//! and applies per-block work through the `DamageSink` once merged back on the
//! simulation thread.

use std::sync::Arc;

use cgmath::InnerSpace;
use log::trace;

use crate::simulation_state::{
    geometry::EffectVolume,
    structures::{BlockHit, BlockWork, CachedBlock, StructuralTarget},
    task_management::task::{CompletionContext, JobOutcome, Task, TaskResult},
    EntityId,
};

/// Finds the blocks to work and puts them in work order.
///
/// # Fields
/// - `structure`: Shared handle to the target
/// - `volume`: Snapshot of the tool's volume when the job was dispatched
/// - `work`: Per-block work, order and cap
/// - `tool`: The tool doing the work
pub struct GatherTask {
    structure: Arc<dyn StructuralTarget>,
    volume: EffectVolume,
    work: BlockWork,
    tool: EntityId,
}

impl GatherTask {
    pub fn new(
        structure: Arc<dyn StructuralTarget>,
        volume: EffectVolume,
        work: BlockWork,
        tool: EntityId,
    ) -> Self {
        GatherTask {
            structure,
            volume,
            work,
            tool,
        }
    }
}

impl Task for GatherTask {
    fn process(&self) -> Box<dyn TaskResult + Send> {
        let mut blocks = if self.structure.is_closed() {
            Vec::new()
        } else {
            self.structure.blocks_in_volume(&self.volume)
        };

        let pose = self.volume.pose;
        self.work.work_order.sort_by_key(&mut blocks, |block| {
            let d = block.center - pose.position;
            let axial = d.dot(pose.forward);
            ((d - pose.forward * axial).magnitude2(), axial)
        });
        if let Some(rate) = self.work.work_rate {
            blocks.truncate(rate);
        }

        Box::new(GatherTaskResult {
            structure: self.structure.clone(),
            blocks,
            work: self.work,
            tool: self.tool,
        })
    }
}

/// Blocks gathered for one tool, ready to be worked.
pub struct GatherTaskResult {
    structure: Arc<dyn StructuralTarget>,
    blocks: Vec<BlockHit>,
    work: BlockWork,
    tool: EntityId,
}

impl GatherTaskResult {
    pub fn blocks(&self) -> &[BlockHit] {
        &self.blocks
    }
}

impl TaskResult for GatherTaskResult {
    fn handle_result(self: Box<Self>, ctx: &mut CompletionContext<'_>) -> JobOutcome {
        let GatherTaskResult {
            structure,
            blocks,
            work,
            tool,
        } = *self;

        // The structure may have been removed while the worker was busy
        if structure.is_closed() {
            trace!("Structure {} closed before gather completed", structure.id());
            return JobOutcome::stale();
        }

        let id = structure.id();
        for block in &blocks {
            ctx.damage.apply_block_work(id, block, &work, tool);
        }

        let hit = !blocks.is_empty();
        let blocks = if work.cache_blocks {
            blocks
                .into_iter()
                .map(|block| CachedBlock {
                    structure: structure.clone(),
                    block,
                })
                .collect()
        } else {
            Vec::new()
        };

        JobOutcome {
            hit,
            blocks,
            ..JobOutcome::default()
        }
    }
}
