//! # Tool Placement
//!
//! Turns the transforms a host reports for a tool into the [`Pose`] its effect
//! volume is built from.
//!
//! ## Key Components
//! - `Location`: Which transform the pose is taken from
//! - `ModelLayout` / `DummyTable`: The tool model's subparts and named dummies,
//!   resolved to indices once when the tool is created
//! - `Placement`: A location with its offset and resolved emitter dummy
//! - `compute_pose`: The per-tick placement rule

use std::collections::HashMap;

use cgmath::{EuclideanSpace, Matrix4, Point3, SquareMatrix, Transform, Vector3, Zero};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{normalize_or, Pose};

/// Source of a tool's effect pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Location {
    /// Centre of the tool's bounds, oriented by the tool.
    #[default]
    Centre,
    /// A muzzle dummy on one of the tool's subparts.
    Emitter,
    /// Wherever the tool's raycast hit, oriented by the tool.
    Hit,
    /// Accepted for compatibility, placed like `Centre`.
    Forward,
    /// Centre of the grid or character carrying the tool.
    Parent,
}

/// World-space transforms of a tool, refreshed by the host every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolTransforms {
    pub world: Matrix4<f32>,
    pub centre: Point3<f32>,
    pub parent_world: Matrix4<f32>,
    pub parent_centre: Point3<f32>,
    /// World matrix of every subpart, indexed like `ModelLayout::subparts`.
    pub parts: Vec<Matrix4<f32>>,
}

impl ToolTransforms {
    /// A tool and its parent both sitting at `world`.
    pub fn at(world: Matrix4<f32>) -> Self {
        let centre = Point3::from_vec(world.w.truncate());
        ToolTransforms {
            world,
            centre,
            parent_world: world,
            parent_centre: centre,
            parts: Vec::new(),
        }
    }
}

impl Default for ToolTransforms {
    fn default() -> Self {
        ToolTransforms::at(Matrix4::identity())
    }
}

/// A named dummy on one of the model's subparts.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyDesc {
    pub name: String,
    /// Index into `ModelLayout::subparts`, or `None` for the tool body itself.
    pub part: Option<usize>,
    /// Dummy matrix relative to its part.
    pub local: Matrix4<f32>,
}

/// Static description of a tool model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelLayout {
    pub subparts: Vec<String>,
    pub dummies: Vec<DummyDesc>,
}

/// Index of a dummy in a [`DummyTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DummyIndex(pub usize);

/// Name lookups for a model, built once so nothing on the tick path searches by string.
#[derive(Debug, Clone, Default)]
pub struct DummyTable {
    dummies: Vec<DummyDesc>,
    dummy_names: HashMap<String, DummyIndex>,
    subpart_names: HashMap<String, usize>,
}

impl DummyTable {
    pub fn build(layout: &ModelLayout) -> Self {
        let dummy_names = layout
            .dummies
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), DummyIndex(i)))
            .collect();
        let subpart_names = layout
            .subparts
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        DummyTable {
            dummies: layout.dummies.clone(),
            dummy_names,
            subpart_names,
        }
    }

    pub fn dummy_index(&self, name: &str) -> Option<DummyIndex> {
        self.dummy_names.get(name).copied()
    }

    pub fn dummy(&self, index: DummyIndex) -> Option<&DummyDesc> {
        self.dummies.get(index.0)
    }

    pub fn subpart_index(&self, name: &str) -> Option<usize> {
        self.subpart_names.get(name).copied()
    }
}

/// Where a tool mode places its volume, with the emitter already resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub location: Location,
    pub offset: Vector3<f32>,
    pub emitter: Option<DummyIndex>,
}

impl Placement {
    /// Resolves the emitter dummy for `location`.
    ///
    /// An `Emitter` placement whose dummy is missing from the model degrades to
    /// `Centre` with a warning.
    pub fn resolve(
        location: Location,
        offset: Vector3<f32>,
        emitter_name: &str,
        table: &DummyTable,
    ) -> Self {
        let mut placement = Placement {
            location,
            offset,
            emitter: None,
        };

        match location {
            Location::Emitter => match table.dummy_index(emitter_name) {
                Some(index) => placement.emitter = Some(index),
                None => {
                    warn!(
                        "Emitter dummy '{}' not found, placing at tool centre instead",
                        emitter_name
                    );
                    placement.location = Location::Centre;
                }
            },
            Location::Forward => {
                info!("Forward placement is handled like Centre");
            }
            _ => {}
        }

        placement
    }
}

impl Default for Placement {
    fn default() -> Self {
        Placement {
            location: Location::Centre,
            offset: Vector3::zero(),
            emitter: None,
        }
    }
}

fn oriented_pose(position: Point3<f32>, matrix: &Matrix4<f32>) -> Pose {
    let mut pose = Pose::from_matrix(matrix);
    pose.position = position;
    pose
}

/// Computes the pose of the effect volume for this tick.
///
/// # Arguments
/// * `placement` - Resolved placement of the current mode
/// * `transforms` - Transforms reported by the host this tick
/// * `table` - The tool model's dummy table
/// * `hit` - Position of the last raycast hit, if one is valid
///
/// # Returns
/// The pose the effect volume should be built from. `Hit` without a valid hit
/// falls back to the `Centre` pose.
pub fn compute_pose(
    placement: &Placement,
    transforms: &ToolTransforms,
    table: &DummyTable,
    hit: Option<Point3<f32>>,
) -> Pose {
    let centre_pose = || {
        oriented_pose(
            transforms.centre + transforms.world.transform_vector(placement.offset),
            &transforms.world,
        )
    };

    match placement.location {
        Location::Centre | Location::Forward => centre_pose(),
        Location::Hit => {
            let mut pose = centre_pose();
            if let Some(hit) = hit {
                pose.position = hit;
            }
            pose
        }
        Location::Parent => oriented_pose(
            transforms.parent_centre + transforms.parent_world.transform_vector(placement.offset),
            &transforms.parent_world,
        ),
        Location::Emitter => {
            let Some(dummy) = placement.emitter.and_then(|index| table.dummy(index)) else {
                return centre_pose();
            };
            let part_world = dummy
                .part
                .and_then(|part| transforms.parts.get(part))
                .unwrap_or(&transforms.world);

            let local_position = Point3::from_vec(dummy.local.w.truncate() + placement.offset);
            let forward = part_world.transform_vector(-dummy.local.z.truncate());
            let up = part_world.transform_vector(dummy.local.y.truncate());
            Pose::new(
                part_world.transform_point(local_position),
                normalize_or(forward, -Vector3::unit_z()),
                normalize_or(up, Vector3::unit_y()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{InnerSpace, Rad};

    fn layout() -> ModelLayout {
        ModelLayout {
            subparts: vec!["head".to_string()],
            dummies: vec![DummyDesc {
                name: "muzzle".to_string(),
                part: Some(0),
                local: Matrix4::from_translation(Vector3::new(0.0, 0.0, -2.0)),
            }],
        }
    }

    fn close(a: Vector3<f32>, b: Vector3<f32>) -> bool {
        (a - b).magnitude() < 1e-5
    }

    #[test]
    fn centre_offset_is_rotated_with_the_tool() {
        let world = Matrix4::from_translation(Vector3::new(10.0, 0.0, 0.0))
            * Matrix4::from_angle_y(Rad(std::f32::consts::FRAC_PI_2));
        let transforms = ToolTransforms::at(world);
        let placement = Placement {
            offset: Vector3::new(0.0, 0.0, -1.0),
            ..Placement::default()
        };

        let pose = compute_pose(&placement, &transforms, &DummyTable::default(), None);

        // A quarter turn about +Y maps -Z onto -X.
        assert!(close(pose.position.to_vec(), Vector3::new(9.0, 0.0, 0.0)));
        assert!(close(pose.forward, Vector3::new(-1.0, 0.0, 0.0)));
        assert!(close(pose.up, Vector3::unit_y()));
    }

    #[test]
    fn emitter_uses_the_part_matrix() {
        let table = DummyTable::build(&layout());
        let mut transforms = ToolTransforms::default();
        transforms
            .parts
            .push(Matrix4::from_translation(Vector3::new(0.0, 5.0, 0.0)));

        let placement = Placement::resolve(Location::Emitter, Vector3::zero(), "muzzle", &table);
        let pose = compute_pose(&placement, &transforms, &table, None);

        assert_eq!(placement.location, Location::Emitter);
        assert!(close(pose.position.to_vec(), Vector3::new(0.0, 5.0, -2.0)));
        assert!(close(pose.forward, -Vector3::unit_z()));
    }

    #[test]
    fn missing_emitter_falls_back_to_centre() {
        let table = DummyTable::build(&layout());
        let placement = Placement::resolve(Location::Emitter, Vector3::zero(), "barrel", &table);

        assert_eq!(placement.location, Location::Centre);
        assert_eq!(placement.emitter, None);
        assert_eq!(table.subpart_index("head"), Some(0));
    }

    #[test]
    fn hit_location_moves_to_the_hit() {
        let transforms = ToolTransforms::default();
        let placement = Placement {
            location: Location::Hit,
            ..Placement::default()
        };
        let hit = Point3::new(1.0, 2.0, 3.0);

        let with_hit = compute_pose(&placement, &transforms, &DummyTable::default(), Some(hit));
        let without = compute_pose(&placement, &transforms, &DummyTable::default(), None);

        assert_eq!(with_hit.position, hit);
        assert_eq!(without.position, Point3::origin());
    }

    #[test]
    fn parent_placement_uses_parent_transform() {
        let mut transforms = ToolTransforms::default();
        transforms.parent_centre = Point3::new(0.0, 1.7, 0.0);
        transforms.parent_world = Matrix4::from_translation(Vector3::new(0.0, 1.7, 0.0));
        let placement = Placement {
            location: Location::Parent,
            offset: Vector3::new(0.0, 0.0, -0.5),
            emitter: None,
        };

        let pose = compute_pose(&placement, &transforms, &DummyTable::default(), None);
        assert!(close(pose.position.to_vec(), Vector3::new(0.0, 1.7, -0.5)));
    }
}
