//! # Structures Module
//!
//! Structural targets are block collections (grids) owned by the host. Tools
//! never edit blocks themselves: they ask the structure which blocks sit inside
//! the effect volume, on a worker, and then hand per-block work to the host's
//! [`DamageSink`] on the simulation thread.
//!
//! ## Key Components
//! - `StructuralTarget`: What a structure must expose to be worked on
//! - `DamageSink`: Where instant entity damage and per-block work are sent
//! - `BlockGrid`: A simple structure of unit blocks, used by the demo and tests
//! - `GatherTask`: Finds and orders the blocks a tool should work this batch
//! - `CachedBlock`: A block a caching tool keeps working across batches

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use cgmath::{EuclideanSpace, Matrix4, Point3, Transform, Vector3};

use crate::{
    core::MtResource,
    simulation_state::{
        geometry::{Aabb, EffectVolume},
        tools::ToolMode,
        voxels::WorkOrder,
        EntityId,
    },
};

pub mod tasks;

pub use tasks::gather_task::{GatherTask, GatherTaskResult};

/// One block of a structure found inside an effect volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHit {
    /// Grid position of the block.
    pub position: Point3<i32>,
    /// World-space centre of the block.
    pub center: Point3<f32>,
}

/// How much work each gathered block receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockWork {
    pub mode: ToolMode,
    pub amount: f32,
    pub work_order: WorkOrder,
    pub work_rate: Option<usize>,
    /// Keep the worked blocks and work them again next batch while they last.
    pub cache_blocks: bool,
}

/// A worked block kept by a tool that caches its blocks.
#[derive(Clone)]
pub struct CachedBlock {
    pub structure: Arc<dyn StructuralTarget>,
    pub block: BlockHit,
}

impl CachedBlock {
    /// Whether the block can still be worked in `mode`.
    pub fn is_workable(&self, mode: ToolMode) -> bool {
        !self.structure.is_closed() && self.structure.is_workable(self.block.position, mode)
    }
}

impl fmt::Debug for CachedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedBlock")
            .field("structure", &self.structure.id())
            .field("block", &self.block)
            .finish()
    }
}

impl PartialEq for CachedBlock {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.structure, &other.structure) && self.block == other.block
    }
}

/// A block collection tools can work on. Shared with workers, so `Send + Sync`.
pub trait StructuralTarget: Send + Sync {
    fn id(&self) -> EntityId;

    /// True once the structure has been removed from the world.
    fn is_closed(&self) -> bool;

    /// Every block whose bounds are touched by `volume`.
    fn blocks_in_volume(&self, volume: &EffectVolume) -> Vec<BlockHit>;

    /// Whether the block at `position` is still there and has work left in
    /// `mode`. Welding has nothing left to do on a fully repaired block.
    fn is_workable(&self, position: Point3<i32>, mode: ToolMode) -> bool;
}

/// Host side of damage: instant damage to entities and queued work on blocks.
pub trait DamageSink {
    fn damage_entity(&mut self, target: EntityId, amount: f32, mode: ToolMode, tool: EntityId);

    fn apply_block_work(
        &mut self,
        structure: EntityId,
        block: &BlockHit,
        work: &BlockWork,
        tool: EntityId,
    );
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDamageSink;

impl DamageSink for NullDamageSink {
    fn damage_entity(&mut self, _target: EntityId, _amount: f32, _mode: ToolMode, _tool: EntityId) {}

    fn apply_block_work(
        &mut self,
        _structure: EntityId,
        _block: &BlockHit,
        _work: &BlockWork,
        _tool: EntityId,
    ) {
    }
}

/// Records every damage call, in order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DamageLog {
    pub entities: Vec<(EntityId, f32, ToolMode)>,
    pub blocks: Vec<(EntityId, Point3<i32>, f32, ToolMode)>,
}

impl DamageSink for DamageLog {
    fn damage_entity(&mut self, target: EntityId, amount: f32, mode: ToolMode, _tool: EntityId) {
        self.entities.push((target, amount, mode));
    }

    fn apply_block_work(
        &mut self,
        structure: EntityId,
        block: &BlockHit,
        work: &BlockWork,
        _tool: EntityId,
    ) {
        self.blocks
            .push((structure, block.position, work.amount, work.mode));
    }
}

/// One block of a [`BlockGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBlock {
    pub position: Point3<i32>,
    /// Build progress in `[0, 1]`, `1` when fully repaired.
    pub integrity: f32,
}

/// A grid of unit blocks placed in the world by a matrix.
///
/// Block `(i, j, k)` is centred at local `(i, j, k)` and spans half a unit each way.
/// Blocks sit behind an `MtResource` so the host can dismount or repair them
/// while gather jobs read the grid.
pub struct BlockGrid {
    id: EntityId,
    world: Matrix4<f32>,
    blocks: MtResource<Vec<GridBlock>>,
    closed: AtomicBool,
}

impl BlockGrid {
    /// A grid of fully built blocks.
    pub fn new(id: EntityId, world: Matrix4<f32>, blocks: Vec<Point3<i32>>) -> Self {
        let blocks = blocks
            .into_iter()
            .map(|position| GridBlock {
                position,
                integrity: 1.0,
            })
            .collect();
        BlockGrid {
            id,
            world,
            blocks: MtResource::new(blocks),
            closed: AtomicBool::new(false),
        }
    }

    pub fn world(&self) -> &Matrix4<f32> {
        &self.world
    }

    pub fn block_count(&self) -> usize {
        self.blocks.get().len()
    }

    pub fn block(&self, position: Point3<i32>) -> Option<GridBlock> {
        self.blocks
            .get()
            .iter()
            .find(|block| block.position == position)
            .copied()
    }

    /// Dismounts a block. Returns `false` if there was none at `position`.
    pub fn remove_block(&self, position: Point3<i32>) -> bool {
        let mut blocks = self.blocks.get_mut();
        let before = blocks.len();
        blocks.retain(|block| block.position != position);
        blocks.len() != before
    }

    /// Sets a block's integrity, clamped to `[0, 1]`.
    pub fn set_integrity(&self, position: Point3<i32>, integrity: f32) -> bool {
        let mut blocks = self.blocks.get_mut();
        match blocks.iter_mut().find(|block| block.position == position) {
            Some(block) => {
                block.integrity = integrity.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Local bounds enclosing every block.
    pub fn local_aabb(&self) -> Aabb {
        let blocks = self.blocks.get();
        let corners = blocks.iter().flat_map(|b| {
            let c = Point3::new(b.position.x as f32, b.position.y as f32, b.position.z as f32);
            [c - Vector3::new(0.5, 0.5, 0.5), c + Vector3::new(0.5, 0.5, 0.5)]
        });
        Aabb::from_points(corners).unwrap_or(Aabb::new(Point3::origin(), Point3::origin()))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl StructuralTarget for BlockGrid {
    fn id(&self) -> EntityId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn blocks_in_volume(&self, volume: &EffectVolume) -> Vec<BlockHit> {
        let bounds = Aabb::from_center_half_extents(Point3::origin(), Vector3::new(0.5, 0.5, 0.5));
        self.blocks
            .get()
            .iter()
            .filter_map(|block| {
                let p = block.position;
                let local = Point3::new(p.x as f32, p.y as f32, p.z as f32);
                let block_world = self.world * Matrix4::from_translation(local.to_vec());
                (!volume.contains(&bounds, &block_world).is_disjoint()).then(|| BlockHit {
                    position: p,
                    center: self.world.transform_point(local),
                })
            })
            .collect()
    }

    fn is_workable(&self, position: Point3<i32>, mode: ToolMode) -> bool {
        self.block(position)
            .is_some_and(|block| mode != ToolMode::Weld || block.integrity < 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_state::geometry::{EffectShape, Pose, ShapeParams};
    use cgmath::SquareMatrix;

    #[test]
    fn grid_reports_only_blocks_touching_the_volume() {
        let blocks = (0..10).map(|x| Point3::new(x, 0, 0)).collect();
        let grid = BlockGrid::new(4, Matrix4::identity(), blocks);
        let params = ShapeParams {
            radius: 1.2,
            ..ShapeParams::default()
        };
        let volume = EffectVolume::new(
            EffectShape::Sphere,
            Pose {
                position: Point3::new(5.0, 0.0, 0.0),
                ..Pose::default()
            },
            &params,
        );

        let hits: Vec<i32> = grid
            .blocks_in_volume(&volume)
            .iter()
            .map(|b| b.position.x)
            .collect();

        assert_eq!(hits, vec![4, 5, 6]);
        assert_eq!(grid.local_aabb().max, Point3::new(9.5, 0.5, 0.5));
    }

    #[test]
    fn dismounted_and_repaired_blocks_stop_being_workable() {
        let blocks = (0..3).map(|x| Point3::new(x, 0, 0)).collect();
        let grid = BlockGrid::new(5, Matrix4::identity(), blocks);

        assert!(grid.is_workable(Point3::new(0, 0, 0), ToolMode::Grind));
        assert!(!grid.is_workable(Point3::new(0, 0, 0), ToolMode::Weld));

        assert!(grid.set_integrity(Point3::new(1, 0, 0), 0.25));
        assert!(grid.is_workable(Point3::new(1, 0, 0), ToolMode::Weld));

        assert!(grid.remove_block(Point3::new(2, 0, 0)));
        assert!(!grid.remove_block(Point3::new(2, 0, 0)));
        assert!(!grid.is_workable(Point3::new(2, 0, 0), ToolMode::Grind));
        assert_eq!(grid.block_count(), 2);
    }
}
