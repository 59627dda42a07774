//! # Voxel Field
//!
//! A dense box of voxel cells placed in the world by a (possibly scaled) matrix.
//!
//! ## Storage
//!
//! Each cell is a two-byte [`VoxelCell`] holding a density and a material. The
//! cells live in one flat `Vec` in x-major order (x, then y, then z), and an
//! occupancy bit vector mirrors `density > 0` so "is anything here" questions
//! don't have to touch the cell array.
//!
//! Cell centres sit at integer local coordinates: cell `(i, j, k)` covers
//! `[i - 0.5, i + 0.5]` and so on along each axis.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bitvec::prelude::BitVec;
use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix3, Matrix4, Point3, SquareMatrix, Transform, Vector3};
use log::warn;
use noise::{NoiseFn, Perlin};

use super::DirtyRange;
use crate::simulation_state::{geometry::Aabb, EntityId};

/// Voxel fields are identified by the entity that owns them.
pub type FieldId = EntityId;

/// Density of a completely full cell.
pub const FULL_DENSITY: u8 = u8::MAX;

/// Threshold above which Perlin noise is considered solid.
pub const PERLIN_POSITIVE_THRESHOLD: f64 = 0.2;
/// Threshold below which Perlin noise is considered solid.
pub const PERLIN_NEGATIVE_THRESHOLD: f64 = -0.2;
/// Scaling factor applied to cell coordinates when sampling Perlin noise.
pub const PERLIN_SCALE_FACTOR: f64 = 0.08;

/// One voxel: how full it is and what it is made of.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VoxelCell {
    pub density: u8,
    pub material: u8,
}

impl VoxelCell {
    pub fn new(density: u8, material: u8) -> Self {
        VoxelCell { density, material }
    }

    pub fn is_solid(&self) -> bool {
        self.density > 0
    }
}

/// Size and world placement of a field.
///
/// The registry keeps a copy of this next to each field so the simulation
/// thread can place tool volumes without taking the field's lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldPlacement {
    size: Vector3<i32>,
    world: Matrix4<f32>,
    inverse: Matrix4<f32>,
}

impl FieldPlacement {
    fn new(size: Vector3<i32>) -> Self {
        FieldPlacement {
            size,
            world: Matrix4::identity(),
            inverse: Matrix4::identity(),
        }
    }

    pub fn size(&self) -> Vector3<i32> {
        self.size
    }

    pub fn bounds(&self) -> DirtyRange {
        DirtyRange::whole(self.size)
    }

    pub fn world(&self) -> &Matrix4<f32> {
        &self.world
    }

    /// Linear part of the world matrix: maps a local offset to a world offset.
    pub fn basis(&self) -> Matrix3<f32> {
        Matrix3::from_cols(
            self.world.x.truncate(),
            self.world.y.truncate(),
            self.world.z.truncate(),
        )
    }

    pub fn to_local(&self, world_point: Point3<f32>) -> Point3<f32> {
        self.inverse.transform_point(world_point)
    }

    pub fn to_world(&self, local_point: Point3<f32>) -> Point3<f32> {
        self.world.transform_point(local_point)
    }

    /// Local bounds enclosing every cell.
    pub fn local_aabb(&self) -> Aabb {
        Aabb::new(
            Point3::new(-0.5, -0.5, -0.5),
            Point3::new(
                self.size.x as f32 - 0.5,
                self.size.y as f32 - 0.5,
                self.size.z as f32 - 0.5,
            ),
        )
    }

    /// Clamps a local index range to the field, `None` if nothing is left.
    pub fn clamp_range(&self, range: &DirtyRange) -> Option<DirtyRange> {
        range.intersection(&self.bounds())
    }
}

/// Flags shared between a field and its registry entry.
///
/// Atomics, so closing or checking a field never waits on a carve holding it.
#[derive(Debug)]
pub struct FieldFlags {
    closed: AtomicBool,
    destructible: AtomicBool,
}

impl FieldFlags {
    fn new() -> Self {
        FieldFlags {
            closed: AtomicBool::new(false),
            destructible: AtomicBool::new(true),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_destructible(&self) -> bool {
        self.destructible.load(Ordering::Acquire)
    }

    pub fn set_destructible(&self, destructible: bool) {
        self.destructible.store(destructible, Ordering::Release);
    }
}

pub struct VoxelField {
    pub id: FieldId,
    placement: FieldPlacement,
    cells: Vec<VoxelCell>,
    /// One bit per cell, set when the cell's density is non-zero.
    occupancy: BitVec,
    flags: Arc<FieldFlags>,
}

impl VoxelField {
    /// Creates a field with every cell set to `cell`.
    ///
    /// # Arguments
    /// * `id` - Entity id of the field
    /// * `size` - Cells per axis, each component clamped to at least 1
    /// * `world` - Local-to-world matrix
    /// * `cell` - Initial value of every cell
    pub fn uniform(id: FieldId, size: Vector3<i32>, world: Matrix4<f32>, cell: VoxelCell) -> Self {
        let size = Vector3::new(size.x.max(1), size.y.max(1), size.z.max(1));
        let count = (size.x * size.y * size.z) as usize;

        let mut field = VoxelField {
            id,
            placement: FieldPlacement::new(size),
            cells: vec![cell; count],
            occupancy: BitVec::repeat(cell.is_solid(), count),
            flags: Arc::new(FieldFlags::new()),
        };
        field.set_world(world);
        field
    }

    /// A field with nothing in it.
    pub fn empty(id: FieldId, size: Vector3<i32>, world: Matrix4<f32>) -> Self {
        Self::uniform(id, size, world, VoxelCell::default())
    }

    /// A field completely filled with `material`.
    pub fn filled(id: FieldId, size: Vector3<i32>, world: Matrix4<f32>, material: u8) -> Self {
        Self::uniform(id, size, world, VoxelCell::new(FULL_DENSITY, material))
    }

    /// Generates a field using Perlin noise, with a random material per solid cell.
    ///
    /// Cells whose noise sample falls outside the
    /// `[PERLIN_NEGATIVE_THRESHOLD, PERLIN_POSITIVE_THRESHOLD]` band are solid.
    pub fn perlin(id: FieldId, size: Vector3<i32>, world: Matrix4<f32>, seed: u32) -> Self {
        let perlin = Perlin::new(seed);
        let mut field = Self::empty(id, size, world);
        let size = field.size();

        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let sample = perlin.get([
                        x as f64 * PERLIN_SCALE_FACTOR,
                        y as f64 * PERLIN_SCALE_FACTOR,
                        z as f64 * PERLIN_SCALE_FACTOR,
                    ]);
                    if !(PERLIN_NEGATIVE_THRESHOLD..=PERLIN_POSITIVE_THRESHOLD).contains(&sample) {
                        let cell = VoxelCell::new(FULL_DENSITY, fastrand::u8(1..4));
                        field.set_cell(Point3::new(x, y, z), cell);
                    }
                }
            }
        }

        field
    }

    pub fn placement(&self) -> &FieldPlacement {
        &self.placement
    }

    pub fn flags(&self) -> &Arc<FieldFlags> {
        &self.flags
    }

    pub fn size(&self) -> Vector3<i32> {
        self.placement.size
    }

    pub fn bounds(&self) -> DirtyRange {
        self.placement.bounds()
    }

    pub fn world(&self) -> &Matrix4<f32> {
        &self.placement.world
    }

    /// Moves the field. A singular matrix is rejected and the old placement kept.
    ///
    /// The registry copies the placement when the field is inserted, so a
    /// registered field that moves has to be inserted again.
    pub fn set_world(&mut self, world: Matrix4<f32>) {
        match world.invert() {
            Some(inverse) => {
                self.placement.world = world;
                self.placement.inverse = inverse;
            }
            None => warn!("Voxel field {} given a singular world matrix, ignoring it", self.id),
        }
    }

    pub fn basis(&self) -> Matrix3<f32> {
        self.placement.basis()
    }

    pub fn to_local(&self, world_point: Point3<f32>) -> Point3<f32> {
        self.placement.to_local(world_point)
    }

    pub fn to_world(&self, local_point: Point3<f32>) -> Point3<f32> {
        self.placement.to_world(local_point)
    }

    pub fn local_aabb(&self) -> Aabb {
        self.placement.local_aabb()
    }

    pub fn is_destructible(&self) -> bool {
        self.flags.is_destructible()
    }

    pub fn set_destructible(&self, destructible: bool) {
        self.flags.set_destructible(destructible);
    }

    pub fn is_closed(&self) -> bool {
        self.flags.is_closed()
    }

    /// Marks the field as removed from the world. Jobs still holding it become no-ops.
    pub fn close(&self) {
        self.flags.close();
    }

    fn index(&self, cell: Point3<i32>) -> Option<usize> {
        let size = self.placement.size;
        if cell.x < 0
            || cell.y < 0
            || cell.z < 0
            || cell.x >= size.x
            || cell.y >= size.y
            || cell.z >= size.z
        {
            return None;
        }
        Some((cell.x + size.x * (cell.y + size.y * cell.z)) as usize)
    }

    pub fn cell(&self, cell: Point3<i32>) -> Option<VoxelCell> {
        self.index(cell).map(|i| self.cells[i])
    }

    /// Writes a cell and keeps the occupancy bit in step. Returns `false` when
    /// `cell` is outside the field.
    pub fn set_cell(&mut self, cell: Point3<i32>, value: VoxelCell) -> bool {
        match self.index(cell) {
            Some(i) => {
                self.cells[i] = value;
                self.occupancy.set(i, value.is_solid());
                true
            }
            None => false,
        }
    }

    pub fn is_solid(&self, cell: Point3<i32>) -> bool {
        self.index(cell).is_some_and(|i| self.occupancy[i])
    }

    /// Number of cells with non-zero density.
    pub fn solid_count(&self) -> usize {
        self.occupancy.count_ones()
    }

    /// Sum of every cell's density.
    pub fn total_density(&self) -> u64 {
        self.cells.iter().map(|c| c.density as u64).sum()
    }

    /// Raw cell storage, two bytes per cell, for hosts that mesh or persist fields.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }

    pub fn clamp_range(&self, range: &DirtyRange) -> Option<DirtyRange> {
        self.placement.clamp_range(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::EuclideanSpace;

    #[test]
    fn occupancy_tracks_density() {
        let mut field = VoxelField::empty(1, Vector3::new(4, 4, 4), Matrix4::identity());
        assert_eq!(field.solid_count(), 0);

        assert!(field.set_cell(Point3::new(1, 2, 3), VoxelCell::new(10, 2)));
        assert!(field.is_solid(Point3::new(1, 2, 3)));
        assert_eq!(field.solid_count(), 1);

        field.set_cell(Point3::new(1, 2, 3), VoxelCell::new(0, 2));
        assert!(!field.is_solid(Point3::new(1, 2, 3)));
        assert!(!field.set_cell(Point3::new(4, 0, 0), VoxelCell::new(1, 1)));
    }

    #[test]
    fn cells_are_two_bytes() {
        let field = VoxelField::filled(1, Vector3::new(2, 2, 2), Matrix4::identity(), 7);
        let bytes = field.as_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..2], &[FULL_DENSITY, 7]);
    }

    #[test]
    fn local_and_world_round_trip() {
        let world = Matrix4::from_translation(Vector3::new(10.0, 0.0, -4.0))
            * Matrix4::from_nonuniform_scale(2.0, 1.0, 0.5);
        let field = VoxelField::empty(1, Vector3::new(8, 8, 8), world);

        let local = Point3::new(3.0, 4.0, 5.0);
        let back = field.to_local(field.to_world(local));
        assert!((back.to_vec() - local.to_vec()).x.abs() < 1e-4);
        assert!((back.to_vec() - local.to_vec()).z.abs() < 1e-4);
        assert_eq!(field.to_world(local), Point3::new(16.0, 4.0, -1.5));
    }

    #[test]
    fn closing_through_shared_flags_reaches_the_field() {
        let field = VoxelField::empty(1, Vector3::new(2, 2, 2), Matrix4::identity());
        let flags = field.flags().clone();

        flags.set_destructible(false);
        flags.close();

        assert!(field.is_closed());
        assert!(!field.is_destructible());
    }

    #[test]
    fn singular_world_matrix_is_ignored() {
        let mut field = VoxelField::empty(1, Vector3::new(2, 2, 2), Matrix4::identity());
        field.set_world(Matrix4::from_scale(0.0));
        assert_eq!(*field.world(), Matrix4::identity());
    }

    #[test]
    fn perlin_fields_only_use_real_materials() {
        let field = VoxelField::perlin(3, Vector3::new(12, 12, 12), Matrix4::identity(), 0);
        for z in 0..12 {
            for y in 0..12 {
                for x in 0..12 {
                    let cell = field.cell(Point3::new(x, y, z)).unwrap();
                    assert!(cell.density == 0 || (1..4).contains(&cell.material));
                }
            }
        }
    }
}
