//! # Voxel Carving
//!
//! Removes density from the cells of a voxel field that fall inside a tool's
//! effect volume.
//!
//! ## Phases
//!
//! A carve runs on a worker thread in three timed phases:
//! 1. **read**: copy the solid cells of the region out of the field
//! 2. **calc**: test membership, order and cap the selection, work out how
//!    much each cell loses and what it yields
//! 3. **write**: store the new densities and grow the dirty range
//!
//! ## Coordinate Frames
//!
//! Cells are walked in the field's local index space, but every membership
//! test happens in metric space: the offset from the tool origin is pushed
//! through the field's basis (`basis * (cell - origin)`) and compared against
//! world-sized radii with squared distances. Non-uniformly scaled fields
//! therefore carve the same physical shape as unscaled ones.

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc, time::Duration};

use cgmath::{InnerSpace, Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use super::{DirtyRange, FieldPlacement, VoxelCell, VoxelField, FULL_DENSITY};
use crate::simulation_state::geometry::{Aabb, EffectShape, EffectVolume, EPSILON};

/// Order in which selected cells (or blocks) are worked.
///
/// Only matters when a work rate caps how much one job may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkOrder {
    /// Index order, no sorting.
    #[default]
    Uniform,
    /// Closest to the tool axis (or centre) first.
    InsideOut,
    /// Farthest from the tool axis (or centre) first.
    OutsideIn,
    /// Nearest along the tool's forward axis first.
    Forward,
    /// Farthest along the tool's forward axis first.
    Backward,
}

impl WorkOrder {
    /// Sorts `items` in place using their `(radial, axial)` distances. Stable, so
    /// ties keep index order.
    pub fn sort_by_key<T>(self, items: &mut [T], key: impl Fn(&T) -> (f32, f32)) {
        let compare: fn(f32, f32) -> Ordering = |a, b| a.total_cmp(&b);
        match self {
            WorkOrder::Uniform => {}
            WorkOrder::InsideOut => items.sort_by(|a, b| compare(key(a).0, key(b).0)),
            WorkOrder::OutsideIn => items.sort_by(|a, b| compare(key(b).0, key(a).0)),
            WorkOrder::Forward => items.sort_by(|a, b| compare(key(a).1, key(b).1)),
            WorkOrder::Backward => items.sort_by(|a, b| compare(key(b).1, key(a).1)),
        }
    }
}

/// Per-material tweaks to how fast a material is removed and how much it yields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialModifier {
    pub speed_ratio: f32,
    pub harvest_ratio: f32,
}

impl Default for MaterialModifier {
    fn default() -> Self {
        MaterialModifier {
            speed_ratio: 1.0,
            harvest_ratio: 1.0,
        }
    }
}

pub type MaterialModifiers = BTreeMap<u8, MaterialModifier>;

/// How a job works the cells it selects.
#[derive(Debug, Clone, PartialEq)]
pub struct CarveWork {
    pub speed: f32,
    pub harvest_ratio: f32,
    pub destroy_voxels: bool,
    pub work_order: WorkOrder,
    /// Most cells one job may change.
    pub work_rate: Option<usize>,
    pub modifiers: Arc<MaterialModifiers>,
}

impl Default for CarveWork {
    fn default() -> Self {
        CarveWork {
            speed: 1.0,
            harvest_ratio: 1.0,
            destroy_voxels: true,
            work_order: WorkOrder::Uniform,
            work_rate: None,
            modifiers: Arc::new(MaterialModifiers::new()),
        }
    }
}

/// Wall-clock time spent in each carve phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub read: Duration,
    pub calc: Duration,
    pub write: Duration,
}

impl PhaseTimings {
    pub fn accumulate(&mut self, other: &PhaseTimings) {
        self.read += other.read;
        self.calc += other.calc;
        self.write += other.write;
    }

    pub fn total(&self) -> Duration {
        self.read + self.calc + self.write
    }
}

/// Everything a carve job needs, expressed in the field's local frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CarveParams {
    pub shape: EffectShape,
    /// Local index range to visit.
    pub region: DirtyRange,
    /// Tool origin in local coordinates.
    pub origin: Point3<f32>,
    /// Local-to-metric linear map.
    pub basis: Matrix3<f32>,
    pub forward: Vector3<f32>,
    pub up: Vector3<f32>,
    pub right: Vector3<f32>,
    pub radius: f32,
    pub length: f32,
    pub half_extent: Vector3<f32>,
    pub work: CarveWork,
}

impl CarveParams {
    /// Snapshots `volume` into the frame of the field at `placement`.
    pub fn new(
        placement: &FieldPlacement,
        volume: &EffectVolume,
        region: DirtyRange,
        work: CarveWork,
    ) -> Self {
        CarveParams {
            shape: volume.shape,
            region,
            origin: placement.to_local(volume.pose.position),
            basis: placement.basis(),
            forward: volume.pose.forward,
            up: volume.pose.up,
            right: volume.pose.right(),
            radius: volume.radius,
            length: volume.length,
            half_extent: volume.half_extent,
            work,
        }
    }

    // Squared half diagonal of one cell in metric space.
    fn half_cell_diagonal_sqr(&self) -> f32 {
        (self.basis * Vector3::new(0.5, 0.5, 0.5)).magnitude2()
    }

    /// Tests one cell, returning its weight and sort keys when it's inside.
    fn membership(&self, cell: Point3<i32>, half_diag_sqr: f32) -> Option<Member> {
        let local = Vector3::new(
            cell.x as f32 - self.origin.x,
            cell.y as f32 - self.origin.y,
            cell.z as f32 - self.origin.z,
        );
        let d = self.basis * local;
        let axial = d.dot(self.forward);

        let (radial, axial_norm) = match self.shape {
            EffectShape::Sphere => {
                let dist_sqr = d.magnitude2();
                if dist_sqr > self.radius * self.radius + EPSILON {
                    return None;
                }
                (dist_sqr, 0.0)
            }
            EffectShape::Cylinder => {
                let half_length = self.length * 0.5;
                let radial_sqr = (d - self.forward * axial).magnitude2();
                if radial_sqr > self.radius * self.radius + EPSILON
                    || axial * axial > half_length * half_length + EPSILON
                {
                    return None;
                }
                (radial_sqr, ratio(axial + half_length, self.length))
            }
            EffectShape::Cuboid => {
                let x = d.dot(self.right);
                let y = d.dot(self.up);
                let h = self.half_extent;
                if x.abs() > h.x + EPSILON || y.abs() > h.y + EPSILON || axial.abs() > h.z + EPSILON
                {
                    return None;
                }
                (x * x + y * y, ratio(axial + h.z, 2.0 * h.z))
            }
            EffectShape::Line | EffectShape::Ray => {
                let along = axial.clamp(0.0, self.length.max(0.0));
                let perp_sqr = (d - self.forward * along).magnitude2();
                if perp_sqr > half_diag_sqr + EPSILON {
                    return None;
                }
                (perp_sqr, ratio(along, self.length))
            }
        };

        let weight = match self.shape {
            EffectShape::Sphere => 1.0,
            _ => 1.0 - 0.5 * axial_norm.clamp(0.0, 1.0),
        };

        Some(Member {
            cell,
            weight,
            radial,
            axial,
        })
    }
}

fn ratio(value: f32, over: f32) -> f32 {
    if over.abs() <= EPSILON {
        0.0
    } else {
        value / over
    }
}

struct Member {
    cell: Point3<i32>,
    weight: f32,
    radial: f32,
    axial: f32,
}

/// What a carve did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarveReport {
    /// Tight bounds of every cell whose density changed.
    pub dirty: Option<DirtyRange>,
    /// Cells whose density changed.
    pub changed: usize,
    /// Solid cells that were inside the volume and got worked.
    pub touched: usize,
    /// Harvested amount per material.
    pub yields: BTreeMap<u8, f32>,
    pub timings: PhaseTimings,
}

impl CarveReport {
    pub fn hit(&self) -> bool {
        self.touched > 0
    }
}

/// Local index range a volume can reach in the field at `placement`, or `None`
/// if it's outside.
///
/// Runs on the simulation thread before a carve task is queued.
pub fn carve_region(placement: &FieldPlacement, volume: &EffectVolume) -> Option<DirtyRange> {
    let world_box = if volume.shape.is_segment() {
        let (start, end) = volume.segment();
        Aabb::from_points([start, end])?
    } else {
        let r = volume.bounding_radius;
        Aabb::from_center_half_extents(volume.pose.position, Vector3::new(r, r, r))
    };
    let local = Aabb::from_points(
        world_box
            .corners()
            .into_iter()
            .map(|c| placement.to_local(c)),
    )?;

    let pad = if volume.shape.is_segment() { 1 } else { 0 };
    let range = DirtyRange::new(
        Point3::new(
            local.min.x.floor() as i32 - pad,
            local.min.y.floor() as i32 - pad,
            local.min.z.floor() as i32 - pad,
        ),
        Point3::new(
            local.max.x.ceil() as i32 + pad,
            local.max.y.ceil() as i32 + pad,
            local.max.z.ceil() as i32 + pad,
        ),
    );
    placement.clamp_range(&range)
}

/// Carves `field` with `params`.
///
/// Closed and indestructible fields are left alone and yield an empty report.
pub fn carve(field: &mut VoxelField, params: &CarveParams) -> CarveReport {
    let mut report = CarveReport::default();
    if field.is_closed() || !field.is_destructible() {
        return report;
    }
    let Some(region) = field.clamp_range(&params.region) else {
        return report;
    };
    let work = &params.work;

    let read_start = Instant::now();
    let solid: Vec<(Point3<i32>, VoxelCell)> = region
        .cells()
        .filter_map(|p| field.cell(p).filter(VoxelCell::is_solid).map(|c| (p, c)))
        .collect();
    report.timings.read = read_start.elapsed();

    let calc_start = Instant::now();
    let half_diag_sqr = params.half_cell_diagonal_sqr();
    let mut members: Vec<(Member, VoxelCell)> = solid
        .iter()
        .filter_map(|(p, c)| params.membership(*p, half_diag_sqr).map(|m| (m, *c)))
        .collect();
    work.work_order
        .sort_by_key(&mut members, |(m, _)| (m.radial, m.axial));
    if let Some(rate) = work.work_rate {
        members.truncate(rate);
    }

    let mut updates = Vec::with_capacity(members.len());
    for (member, cell) in &members {
        let modifier = work
            .modifiers
            .get(&cell.material)
            .copied()
            .unwrap_or_default();

        let amount = (FULL_DENSITY as f32 * work.speed * member.weight * modifier.speed_ratio)
            .ceil()
            .clamp(0.0, FULL_DENSITY as f32) as u8;
        let removed = amount.min(cell.density);
        report.touched += 1;
        if removed == 0 {
            continue;
        }

        *report.yields.entry(cell.material).or_insert(0.0) += removed as f32
            / FULL_DENSITY as f32
            * work.harvest_ratio
            * modifier.harvest_ratio;
        updates.push((member.cell, VoxelCell::new(cell.density - removed, cell.material)));
    }
    report.timings.calc = calc_start.elapsed();

    let write_start = Instant::now();
    if work.destroy_voxels {
        for (p, value) in updates {
            field.set_cell(p, value);
            match report.dirty.as_mut() {
                Some(dirty) => dirty.include(p),
                None => report.dirty = Some(DirtyRange::single(p)),
            }
            report.changed += 1;
        }
    }
    report.timings.write = write_start.elapsed();

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_state::geometry::{Pose, ShapeParams};
    use cgmath::{Matrix4, SquareMatrix};

    fn solid_field(size: i32, world: Matrix4<f32>) -> VoxelField {
        VoxelField::filled(1, Vector3::new(size, size, size), world, 1)
    }

    fn volume_at(shape: EffectShape, position: Point3<f32>, params: ShapeParams) -> EffectVolume {
        let pose = Pose {
            position,
            ..Pose::default()
        };
        EffectVolume::new(shape, pose, &params)
    }

    fn sphere(radius: f32) -> ShapeParams {
        ShapeParams {
            radius,
            ..ShapeParams::default()
        }
    }

    #[test]
    fn sphere_in_the_middle_of_a_block_reports_a_tight_dirty_range() {
        let mut field = solid_field(10, Matrix4::identity());
        let volume = volume_at(EffectShape::Sphere, Point3::new(4.5, 4.5, 4.5), sphere(3.0));
        let region = field.bounds();
        let params = CarveParams::new(field.placement(), &volume, region, CarveWork::default());

        let report = carve(&mut field, &params);

        let dirty = report.dirty.expect("sphere should carve something");
        assert!(!dirty.is_empty());
        assert!(dirty.is_within(&region));
        assert!(dirty.cell_count() < region.cell_count());
        assert_eq!(field.cell(Point3::new(4, 4, 4)).unwrap().density, 0);
        assert_eq!(field.cell(Point3::new(0, 0, 0)).unwrap().density, FULL_DENSITY);
        assert_eq!(report.changed, report.touched);
    }

    #[test]
    fn region_of_a_volume_is_clamped_to_the_field() {
        let field = solid_field(10, Matrix4::identity());

        let volume = volume_at(EffectShape::Sphere, Point3::new(0.0, 0.0, 0.0), sphere(2.0));
        let region = carve_region(field.placement(), &volume).unwrap();
        assert_eq!(region.min, Point3::new(0, 0, 0));
        assert_eq!(region.max, Point3::new(2, 2, 2));

        let far = volume_at(EffectShape::Sphere, Point3::new(50.0, 0.0, 0.0), sphere(2.0));
        assert_eq!(carve_region(field.placement(), &far), None);
    }

    #[test]
    fn scaled_fields_carve_in_metric_space() {
        let world = Matrix4::from_scale(2.0);
        let mut field = solid_field(11, world);
        let volume = volume_at(EffectShape::Sphere, Point3::new(10.0, 10.0, 10.0), sphere(3.0));
        let region = carve_region(field.placement(), &volume).unwrap();
        let params = CarveParams::new(field.placement(), &volume, region, CarveWork::default());

        let report = carve(&mut field, &params);

        assert_eq!(
            report.dirty,
            Some(DirtyRange::new(Point3::new(4, 4, 4), Point3::new(6, 6, 6)))
        );
    }

    #[test]
    fn cylinder_removes_less_toward_the_far_end() {
        let mut field = solid_field(11, Matrix4::identity());
        let params = ShapeParams {
            radius: 1.0,
            length: 4.0,
            ..ShapeParams::default()
        };
        // Default pose faces -Z.
        let volume = volume_at(EffectShape::Cylinder, Point3::new(5.0, 5.0, 5.0), params);
        let work = CarveWork {
            speed: 0.5,
            ..CarveWork::default()
        };
        let carve_params = CarveParams::new(field.placement(), &volume, field.bounds(), work);

        carve(&mut field, &carve_params);

        assert_eq!(field.cell(Point3::new(5, 5, 3)).unwrap().density, 191);
        assert_eq!(field.cell(Point3::new(5, 5, 7)).unwrap().density, 127);
        assert_eq!(field.cell(Point3::new(5, 5, 2)).unwrap().density, FULL_DENSITY);
    }

    #[test]
    fn line_follows_the_tool_axis() {
        let mut field = solid_field(10, Matrix4::identity());
        let params = ShapeParams {
            length: 4.0,
            ..ShapeParams::default()
        };
        let volume = volume_at(EffectShape::Line, Point3::new(2.0, 2.0, 8.0), params);
        let region = carve_region(field.placement(), &volume).unwrap();
        let carve_params = CarveParams::new(field.placement(), &volume, region, CarveWork::default());

        let report = carve(&mut field, &carve_params);

        assert_eq!(
            report.dirty,
            Some(DirtyRange::new(Point3::new(2, 2, 4), Point3::new(2, 2, 8)))
        );
        assert_eq!(report.changed, 5);
    }

    #[test]
    fn work_rate_and_order_pick_the_centre_first() {
        let mut field = solid_field(11, Matrix4::identity());
        let volume = volume_at(EffectShape::Sphere, Point3::new(5.0, 5.0, 5.0), sphere(2.0));
        let work = CarveWork {
            work_order: WorkOrder::InsideOut,
            work_rate: Some(1),
            ..CarveWork::default()
        };
        let params = CarveParams::new(field.placement(), &volume, field.bounds(), work);

        let report = carve(&mut field, &params);

        assert_eq!(report.changed, 1);
        assert_eq!(report.dirty, Some(DirtyRange::single(Point3::new(5, 5, 5))));
    }

    #[test]
    fn harvesting_without_destroying_leaves_density_alone() {
        let mut field = solid_field(6, Matrix4::identity());
        let before = field.total_density();
        let volume = volume_at(EffectShape::Sphere, Point3::new(2.5, 2.5, 2.5), sphere(1.5));
        let work = CarveWork {
            destroy_voxels: false,
            harvest_ratio: 0.5,
            ..CarveWork::default()
        };
        let params = CarveParams::new(field.placement(), &volume, field.bounds(), work);

        let report = carve(&mut field, &params);

        assert_eq!(field.total_density(), before);
        assert_eq!(report.dirty, None);
        assert!(report.hit());
        let harvested = report.yields[&1];
        assert!((harvested - report.touched as f32 * 0.5).abs() < 1e-4);
    }

    #[test]
    fn material_modifiers_can_make_a_material_immune() {
        let mut field = solid_field(6, Matrix4::identity());
        let mut modifiers = MaterialModifiers::new();
        modifiers.insert(
            1,
            MaterialModifier {
                speed_ratio: 0.0,
                harvest_ratio: 1.0,
            },
        );
        let work = CarveWork {
            modifiers: Arc::new(modifiers),
            ..CarveWork::default()
        };
        let volume = volume_at(EffectShape::Sphere, Point3::new(2.5, 2.5, 2.5), sphere(2.0));
        let params = CarveParams::new(field.placement(), &volume, field.bounds(), work);

        let report = carve(&mut field, &params);

        assert_eq!(report.changed, 0);
        assert!(report.yields.is_empty());
    }

    #[test]
    fn closed_fields_are_not_carved() {
        let mut field = solid_field(6, Matrix4::identity());
        field.close();
        let volume = volume_at(EffectShape::Sphere, Point3::new(2.5, 2.5, 2.5), sphere(2.0));
        let params = CarveParams::new(field.placement(), &volume, field.bounds(), CarveWork::default());

        assert_eq!(carve(&mut field, &params), CarveReport::default());
    }
}
