//! Narrow-phase tests between effect volumes and candidate boxes.
//!
//! Every test compares squared distances where it can. All bounds are
//! inclusive, so a zero-sized box sitting exactly on a volume's surface (or at
//! its centre) counts as touching it.

use cgmath::{InnerSpace, Point3, Vector3};

use super::{shape::Containment, Obb, EPSILON};

fn components(v: Vector3<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

/// Sphere against an oriented box.
///
/// `Contains` means every corner of the box is inside the sphere.
pub fn sphere_obb(center: Point3<f32>, radius: f32, obb: &Obb) -> Containment {
    let local = components(obb.to_local(center));
    let half = components(obb.half_extent);

    let mut dist_sqr = 0.0;
    for i in 0..3 {
        let clamped = local[i].clamp(-half[i], half[i]);
        let d = local[i] - clamped;
        dist_sqr += d * d;
    }

    let radius_sqr = radius * radius;
    if dist_sqr > radius_sqr + EPSILON {
        return Containment::Disjoint;
    }

    let all_inside = obb
        .corners()
        .iter()
        .all(|corner| (*corner - center).magnitude2() <= radius_sqr + EPSILON);
    if all_inside {
        Containment::Contains
    } else {
        Containment::Intersects
    }
}

/// Separating-axis test between the tool's box `a` and a candidate box `b`.
///
/// `Contains` means every corner of `b` is inside `a`.
pub fn obb_obb(a: &Obb, b: &Obb) -> Containment {
    let ea = components(a.half_extent);
    let eb = components(b.half_extent);

    let mut r = [[0.0f32; 3]; 3];
    let mut abs_r = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            r[i][j] = a.axes[i].dot(b.axes[j]);
            abs_r[i][j] = r[i][j].abs() + EPSILON;
        }
    }

    let d = b.center - a.center;
    let t = [d.dot(a.axes[0]), d.dot(a.axes[1]), d.dot(a.axes[2])];

    // Face axes of a.
    for i in 0..3 {
        let ra = ea[i];
        let rb = eb[0] * abs_r[i][0] + eb[1] * abs_r[i][1] + eb[2] * abs_r[i][2];
        if t[i].abs() > ra + rb {
            return Containment::Disjoint;
        }
    }

    // Face axes of b.
    for j in 0..3 {
        let ra = ea[0] * abs_r[0][j] + ea[1] * abs_r[1][j] + ea[2] * abs_r[2][j];
        let rb = eb[j];
        let tj = t[0] * r[0][j] + t[1] * r[1][j] + t[2] * r[2][j];
        if tj.abs() > ra + rb {
            return Containment::Disjoint;
        }
    }

    // Edge-edge axes a_i x b_j.
    for i in 0..3 {
        let (i1, i2) = ((i + 1) % 3, (i + 2) % 3);
        for j in 0..3 {
            let (j1, j2) = ((j + 1) % 3, (j + 2) % 3);
            let ra = ea[i1] * abs_r[i2][j] + ea[i2] * abs_r[i1][j];
            let rb = eb[j1] * abs_r[i][j2] + eb[j2] * abs_r[i][j1];
            let tl = t[i2] * r[i1][j] - t[i1] * r[i2][j];
            if tl.abs() > ra + rb {
                return Containment::Disjoint;
            }
        }
    }

    if b.corners().iter().all(|corner| a.contains_point(*corner)) {
        Containment::Contains
    } else {
        Containment::Intersects
    }
}

/// Segment against an oriented box using the slab method in box space.
///
/// Returns the fraction along the segment where it first touches the box, or
/// `None` if it misses. A zero-length segment degenerates to a point test.
pub fn segment_obb(start: Point3<f32>, end: Point3<f32>, obb: &Obb) -> Option<f32> {
    let origin = components(obb.to_local(start));
    let target = components(obb.to_local(end));
    let half = components(obb.half_extent);

    let mut t_min = 0.0f32;
    let mut t_max = 1.0f32;
    for i in 0..3 {
        let dir = target[i] - origin[i];
        if dir.abs() <= EPSILON {
            if origin[i] < -half[i] - EPSILON || origin[i] > half[i] + EPSILON {
                return None;
            }
            continue;
        }

        let inv = 1.0 / dir;
        let mut t1 = (-half[i] - origin[i]) * inv;
        let mut t2 = (half[i] - origin[i]) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        t_min = t_min.max(t1);
        t_max = t_max.min(t2);
        if t_min > t_max + EPSILON {
            return None;
        }
    }

    Some(t_min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_state::geometry::{Aabb, Pose};
    use cgmath::{EuclideanSpace, Matrix4, Rad};

    fn unit_box_at(x: f32, y: f32, z: f32) -> Obb {
        let aabb = Aabb::from_center_half_extents(Point3::origin(), Vector3::new(0.5, 0.5, 0.5));
        Obb::from_local_aabb(&aabb, &Matrix4::from_translation(Vector3::new(x, y, z)))
    }

    #[test]
    fn sphere_distinguishes_contains_from_intersects() {
        let center = Point3::origin();
        assert_eq!(sphere_obb(center, 5.0, &unit_box_at(0.0, 0.0, 1.0)), Containment::Contains);
        assert_eq!(sphere_obb(center, 1.0, &unit_box_at(0.0, 0.0, 1.0)), Containment::Intersects);
        assert_eq!(sphere_obb(center, 1.0, &unit_box_at(0.0, 0.0, 3.0)), Containment::Disjoint);
    }

    #[test]
    fn separating_axis_catches_rotated_boxes() {
        let tool = Obb::from_pose(&Pose::default(), Vector3::new(1.0, 1.0, 1.0));

        // Rotated 45 degrees, corner pointing at the tool but not reaching it.
        let aabb = Aabb::from_center_half_extents(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let world = Matrix4::from_translation(Vector3::new(2.5, 0.0, 0.0))
            * Matrix4::from_angle_y(Rad(std::f32::consts::FRAC_PI_4));
        let rotated = Obb::from_local_aabb(&aabb, &world);
        assert_eq!(obb_obb(&tool, &rotated), Containment::Intersects);

        let far = Matrix4::from_translation(Vector3::new(3.5, 0.0, 0.0))
            * Matrix4::from_angle_y(Rad(std::f32::consts::FRAC_PI_4));
        assert_eq!(obb_obb(&tool, &Obb::from_local_aabb(&aabb, &far)), Containment::Disjoint);
    }

    #[test]
    fn segment_reports_entry_fraction() {
        let obb = unit_box_at(0.0, 0.0, -5.0);
        let hit = segment_obb(Point3::origin(), Point3::new(0.0, 0.0, -10.0), &obb);
        let t = hit.expect("segment passes through the box");
        assert!((t - 0.45).abs() < 1e-4);

        assert!(segment_obb(Point3::origin(), Point3::new(0.0, 0.0, -4.0), &obb).is_none());
        assert!(segment_obb(Point3::new(2.0, 0.0, 0.0), Point3::new(2.0, 0.0, -10.0), &obb).is_none());
    }
}
