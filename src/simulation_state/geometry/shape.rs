//! # Effect Shapes
//!
//! Builds the world-space [`EffectVolume`] a tool applies each work tick and
//! answers, for a candidate's local box and world matrix, whether the volume
//! misses it, touches it or swallows it whole.

use cgmath::{InnerSpace, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

use super::{
    intersect::{obb_obb, segment_obb, sphere_obb},
    Aabb, Obb, Pose, EPSILON,
};

/// The five shapes a tool can work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectShape {
    #[default]
    Sphere,
    Cylinder,
    Cuboid,
    Line,
    Ray,
}

impl EffectShape {
    /// Line and Ray work along a segment rather than inside a closed volume.
    pub fn is_segment(self) -> bool {
        matches!(self, EffectShape::Line | EffectShape::Ray)
    }
}

/// Size parameters of a shape after action ratios have been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeParams {
    pub radius: f32,
    pub length: f32,
    pub half_extent: Vector3<f32>,
}

impl ShapeParams {
    /// Radius of the sphere, centred on the tool, that encloses the shape.
    pub fn bounding_radius(&self, shape: EffectShape) -> f32 {
        match shape {
            EffectShape::Sphere => self.radius,
            EffectShape::Cylinder => {
                let half_length = self.length * 0.5;
                (self.radius * self.radius + half_length * half_length).sqrt()
            }
            EffectShape::Cuboid => self.half_extent.magnitude(),
            EffectShape::Line | EffectShape::Ray => self.length,
        }
    }
}

impl Default for ShapeParams {
    fn default() -> Self {
        ShapeParams {
            radius: 1.0,
            length: 1.0,
            half_extent: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Outcome of a containment test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Disjoint,
    Intersects,
    Contains,
}

impl Containment {
    pub fn is_disjoint(self) -> bool {
        self == Containment::Disjoint
    }
}

/// What the host's spatial index should be asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BroadPhase {
    Sphere { center: Point3<f32>, radius: f32 },
    Segment { start: Point3<f32>, end: Point3<f32> },
    /// Only the entity the tool's raycast hit is a candidate.
    HitEntity,
}

/// A tool's effect volume in world space for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectVolume {
    pub shape: EffectShape,
    pub pose: Pose,
    pub radius: f32,
    pub length: f32,
    pub half_extent: Vector3<f32>,
    pub bounding_radius: f32,
}

impl EffectVolume {
    pub fn new(shape: EffectShape, pose: Pose, params: &ShapeParams) -> Self {
        EffectVolume {
            shape,
            pose,
            radius: params.radius,
            length: params.length,
            half_extent: params.half_extent,
            bounding_radius: params.bounding_radius(shape),
        }
    }

    /// Shortens a ray to the fraction at which the raycast hit something.
    pub fn with_ray_fraction(mut self, fraction: f32) -> Self {
        self.length *= fraction.clamp(0.0, 1.0);
        self.bounding_radius = self.length;
        self
    }

    pub fn center(&self) -> Point3<f32> {
        self.pose.position
    }

    /// Start and end of the working segment, starting at the tool and
    /// running `length` along its forward vector.
    pub fn segment(&self) -> (Point3<f32>, Point3<f32>) {
        let start = self.pose.position;
        (start, start + self.pose.forward * self.length)
    }

    /// The tool's own oriented box, used by Cuboid.
    pub fn obb(&self) -> Obb {
        Obb::from_pose(&self.pose, self.half_extent)
    }

    pub fn broad_phase(&self) -> BroadPhase {
        match self.shape {
            EffectShape::Sphere | EffectShape::Cylinder | EffectShape::Cuboid => {
                BroadPhase::Sphere {
                    center: self.pose.position,
                    radius: self.bounding_radius,
                }
            }
            EffectShape::Line => {
                let (start, end) = self.segment();
                BroadPhase::Segment { start, end }
            }
            EffectShape::Ray => BroadPhase::HitEntity,
        }
    }

    /// Tests a candidate whose bounds are `local_aabb` placed by `world`.
    pub fn contains(&self, local_aabb: &Aabb, world: &Matrix4<f32>) -> Containment {
        let candidate = Obb::from_local_aabb(local_aabb, world);
        match self.shape {
            EffectShape::Sphere => sphere_obb(self.pose.position, self.radius, &candidate),
            EffectShape::Cylinder => self.cylinder_contains(&candidate),
            EffectShape::Cuboid => obb_obb(&self.obb(), &candidate),
            EffectShape::Line | EffectShape::Ray => {
                let (start, end) = self.segment();
                match segment_obb(start, end, &candidate) {
                    Some(_) => Containment::Intersects,
                    None => Containment::Disjoint,
                }
            }
        }
    }

    // Radial and axial bounds checked independently, each padded by the
    // candidate's largest half extent. This over-accepts near the rims.
    fn cylinder_contains(&self, candidate: &Obb) -> Containment {
        let half_edge = candidate
            .half_extent
            .x
            .max(candidate.half_extent.y)
            .max(candidate.half_extent.z);
        let half_length = self.length * 0.5;

        let offset = candidate.center - self.pose.position;
        let axial = offset.dot(self.pose.forward);
        let radial_sqr = (offset - self.pose.forward * axial).magnitude2();
        let axial_sqr = axial * axial;

        let radial_limit = self.radius + half_edge;
        let axial_limit = half_length + half_edge;
        if radial_sqr > radial_limit * radial_limit + EPSILON
            || axial_sqr > axial_limit * axial_limit + EPSILON
        {
            return Containment::Disjoint;
        }

        let reach = candidate.half_extent.magnitude();
        let radial_fit = self.radius - reach;
        let axial_fit = half_length - reach;
        if radial_fit >= 0.0
            && axial_fit >= 0.0
            && radial_sqr <= radial_fit * radial_fit + EPSILON
            && axial_sqr <= axial_fit * axial_fit + EPSILON
        {
            Containment::Contains
        } else {
            Containment::Intersects
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::EuclideanSpace;

    const ALL_SHAPES: [EffectShape; 5] = [
        EffectShape::Sphere,
        EffectShape::Cylinder,
        EffectShape::Cuboid,
        EffectShape::Line,
        EffectShape::Ray,
    ];

    fn box_at(center: Vector3<f32>, half: f32) -> (Aabb, Matrix4<f32>) {
        (
            Aabb::from_center_half_extents(Point3::origin(), Vector3::new(half, half, half)),
            Matrix4::from_translation(center),
        )
    }

    #[test]
    fn sphere_facing_positive_z_finds_near_box_and_misses_far_box() {
        let pose = Pose::new(Point3::origin(), Vector3::unit_z(), Vector3::unit_y());
        let params = ShapeParams {
            radius: 2.0,
            ..ShapeParams::default()
        };
        let volume = EffectVolume::new(EffectShape::Sphere, pose, &params);

        let (aabb, world) = box_at(Vector3::new(0.0, 0.0, 1.0), 0.5);
        assert!(!volume.contains(&aabb, &world).is_disjoint());

        let (aabb, world) = box_at(Vector3::new(0.0, 0.0, 10.0), 0.5);
        assert_eq!(volume.contains(&aabb, &world), Containment::Disjoint);
    }

    #[test]
    fn zero_sized_candidate_at_the_centre_is_never_disjoint() {
        let pose = Pose::new(
            Point3::new(3.0, -2.0, 7.0),
            Vector3::new(1.0, 0.0, 1.0).normalize(),
            Vector3::unit_y(),
        );
        let params = ShapeParams {
            radius: 1.5,
            length: 4.0,
            half_extent: Vector3::new(1.0, 0.5, 2.0),
        };

        for shape in ALL_SHAPES {
            let volume = EffectVolume::new(shape, pose, &params);
            let (aabb, world) = box_at(pose.position.to_vec(), 0.0);
            assert!(
                !volume.contains(&aabb, &world).is_disjoint(),
                "{shape:?} rejected a candidate at its own centre"
            );
        }
    }

    #[test]
    fn cylinder_checks_radial_and_axial_bounds_separately() {
        let params = ShapeParams {
            radius: 1.0,
            length: 4.0,
            ..ShapeParams::default()
        };
        let volume = EffectVolume::new(EffectShape::Cylinder, Pose::default(), &params);

        let (aabb, world) = box_at(Vector3::new(1.2, 0.0, 0.0), 0.5);
        assert_eq!(volume.contains(&aabb, &world), Containment::Intersects);

        let (aabb, world) = box_at(Vector3::new(2.0, 0.0, 0.0), 0.5);
        assert_eq!(volume.contains(&aabb, &world), Containment::Disjoint);

        let (aabb, world) = box_at(Vector3::new(0.0, 0.0, -3.0), 0.5);
        assert_eq!(volume.contains(&aabb, &world), Containment::Disjoint);

        let (aabb, world) = box_at(Vector3::new(0.0, 0.0, -0.5), 0.2);
        assert_eq!(volume.contains(&aabb, &world), Containment::Contains);
    }

    #[test]
    fn ray_fraction_shortens_the_segment() {
        let params = ShapeParams {
            length: 10.0,
            ..ShapeParams::default()
        };
        let volume =
            EffectVolume::new(EffectShape::Ray, Pose::default(), &params).with_ray_fraction(0.5);

        let (_, end) = volume.segment();
        assert!((end - Point3::new(0.0, 0.0, -5.0)).magnitude() < 1e-5);
        assert_eq!(volume.broad_phase(), BroadPhase::HitEntity);

        let (aabb, world) = box_at(Vector3::new(0.0, 0.0, -7.0), 0.5);
        assert_eq!(volume.contains(&aabb, &world), Containment::Disjoint);
    }

    #[test]
    fn bounding_radius_per_shape() {
        let params = ShapeParams {
            radius: 3.0,
            length: 8.0,
            half_extent: Vector3::new(1.0, 2.0, 2.0),
        };
        assert_eq!(params.bounding_radius(EffectShape::Sphere), 3.0);
        assert_eq!(params.bounding_radius(EffectShape::Cylinder), 5.0);
        assert_eq!(params.bounding_radius(EffectShape::Cuboid), 3.0);
        assert_eq!(params.bounding_radius(EffectShape::Line), 8.0);
    }
}
