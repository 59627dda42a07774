//! # Geometry Module
//!
//! Pure geometry used by every tool tick: poses, bounding volumes, the five
//! effect shapes and their containment tests, and the placement rules that turn
//! host transforms into a tool pose.
//!
//! ## Conventions
//!
//! * Right-handed coordinates, `f32` throughout.
//! * A world matrix faces down its `-Z` column and its `+Y` column is up, the
//!   same convention `cgmath::Matrix4::look_to_rh` uses for cameras.
//! * Nothing in here holds state. Every function can be called from several
//!   tools at once.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Transform, Vector3, Zero};

pub mod intersect;
pub mod placement;
pub mod shape;

pub use placement::{
    compute_pose, DummyDesc, DummyIndex, DummyTable, Location, ModelLayout, Placement,
    ToolTransforms,
};
pub use shape::{BroadPhase, Containment, EffectShape, EffectVolume, ShapeParams};

/// Squared lengths below this are treated as zero.
pub const EPSILON: f32 = 1e-6;

/// Position plus an orthonormal forward/up pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point3<f32>,
    pub forward: Vector3<f32>,
    pub up: Vector3<f32>,
}

impl Pose {
    pub fn new(position: Point3<f32>, forward: Vector3<f32>, up: Vector3<f32>) -> Self {
        Pose {
            position,
            forward,
            up,
        }
    }

    /// Pose of an arbitrary world matrix, axes normalized to strip scale.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        Pose {
            position: Point3::from_vec(matrix.w.truncate()),
            forward: normalize_or(-matrix.z.truncate(), -Vector3::unit_z()),
            up: normalize_or(matrix.y.truncate(), Vector3::unit_y()),
        }
    }

    /// Right vector completing the basis.
    pub fn right(&self) -> Vector3<f32> {
        self.forward.cross(self.up)
    }

    /// World matrix whose `-Z` column is `forward` and `+Y` column is `up`.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let z = -self.forward;
        let x = self.up.cross(z);
        Matrix4::from_cols(
            x.extend(0.0),
            self.up.extend(0.0),
            z.extend(0.0),
            self.position.to_vec().extend(1.0),
        )
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose {
            position: Point3::origin(),
            forward: -Vector3::unit_z(),
            up: Vector3::unit_y(),
        }
    }
}

/// Normalizes `v`, or returns `fallback` when `v` is degenerate.
pub fn normalize_or(v: Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    if v.magnitude2() <= EPSILON {
        fallback
    } else {
        v.normalize()
    }
}

/// Axis-aligned box in some local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Aabb { min, max }
    }

    pub fn from_center_half_extents(center: Point3<f32>, half: Vector3<f32>) -> Self {
        Aabb {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Point3<f32> {
        self.min.midpoint(self.max)
    }

    pub fn half_extents(&self) -> Vector3<f32> {
        (self.max - self.min) * 0.5
    }

    /// Largest absolute half extent.
    pub fn max_half_extent(&self) -> f32 {
        let h = self.half_extents();
        h.x.abs().max(h.y.abs()).max(h.z.abs())
    }

    /// Smallest box containing every point in `points`.
    pub fn from_points<I: IntoIterator<Item = Point3<f32>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Aabb::new(first, first);
        for p in iter {
            aabb.min.x = aabb.min.x.min(p.x);
            aabb.min.y = aabb.min.y.min(p.y);
            aabb.min.z = aabb.min.z.min(p.z);
            aabb.max.x = aabb.max.x.max(p.x);
            aabb.max.y = aabb.max.y.max(p.y);
            aabb.max.z = aabb.max.z.max(p.z);
        }
        Some(aabb)
    }

    pub fn corners(&self) -> [Point3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }
}

/// Oriented bounding box: centre, three unit axes and the half extent along each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Point3<f32>,
    pub axes: [Vector3<f32>; 3],
    pub half_extent: Vector3<f32>,
}

impl Obb {
    /// Box of a candidate: its local AABB placed by its (possibly scaled) world matrix.
    pub fn from_local_aabb(aabb: &Aabb, world: &Matrix4<f32>) -> Self {
        let columns = [
            world.x.truncate(),
            world.y.truncate(),
            world.z.truncate(),
        ];
        let scale = Vector3::new(
            columns[0].magnitude(),
            columns[1].magnitude(),
            columns[2].magnitude(),
        );
        let half = aabb.half_extents();
        Obb {
            center: world.transform_point(aabb.center()),
            axes: [
                normalize_or(columns[0], Vector3::unit_x()),
                normalize_or(columns[1], Vector3::unit_y()),
                normalize_or(columns[2], Vector3::unit_z()),
            ],
            half_extent: Vector3::new(
                half.x.abs() * scale.x,
                half.y.abs() * scale.y,
                half.z.abs() * scale.z,
            ),
        }
    }

    /// Box of the tool itself, oriented by its pose.
    pub fn from_pose(pose: &Pose, half_extent: Vector3<f32>) -> Self {
        Obb {
            center: pose.position,
            axes: [pose.right(), pose.up, -pose.forward],
            half_extent,
        }
    }

    /// Offset of `point` from the centre expressed along the box axes.
    pub fn to_local(&self, point: Point3<f32>) -> Vector3<f32> {
        let d = point - self.center;
        Vector3::new(d.dot(self.axes[0]), d.dot(self.axes[1]), d.dot(self.axes[2]))
    }

    pub fn contains_point(&self, point: Point3<f32>) -> bool {
        let local = self.to_local(point);
        local.x.abs() <= self.half_extent.x + EPSILON
            && local.y.abs() <= self.half_extent.y + EPSILON
            && local.z.abs() <= self.half_extent.z + EPSILON
    }

    pub fn corners(&self) -> [Point3<f32>; 8] {
        let mut corners = [self.center; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let mut offset = Vector3::zero();
            for (axis, h) in [
                (0, self.half_extent.x),
                (1, self.half_extent.y),
                (2, self.half_extent.z),
            ] {
                let sign = if i & (1 << axis) == 0 { -1.0 } else { 1.0 };
                offset += self.axes[axis] * (h * sign);
            }
            *corner = self.center + offset;
        }
        corners
    }

    /// World-aligned box around this one.
    pub fn aabb(&self) -> Aabb {
        let mut extent = Vector3::zero();
        for (axis, h) in self.axes.iter().zip([
            self.half_extent.x,
            self.half_extent.y,
            self.half_extent.z,
        ]) {
            extent.x += (axis.x * h).abs();
            extent.y += (axis.y * h).abs();
            extent.z += (axis.z * h).abs();
        }
        Aabb::from_center_half_extents(self.center, extent)
    }
}
