use std::{fmt, sync::Arc};

use cgmath::{Matrix4, Point3, Vector3};

use super::OwnerId;
use crate::simulation_state::{
    geometry::Aabb, structures::StructuralTarget, voxels::FieldId, EntityId,
};

/// Flags a host reports for a structural target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureFlags {
    /// Can be edited at all (not locked by the host).
    pub editable: bool,
    pub destructible: bool,
    /// Immune to grinding and drilling.
    pub immune: bool,
    /// A build projection rather than a real structure.
    pub projected: bool,
    pub physics_enabled: bool,
}

impl Default for StructureFlags {
    fn default() -> Self {
        StructureFlags {
            editable: true,
            destructible: true,
            immune: false,
            projected: false,
            physics_enabled: true,
        }
    }
}

/// What kind of object a candidate is.
#[derive(Clone)]
pub enum CandidateKind {
    /// Something that takes damage directly, like a character or a loose object.
    Destructible { character: bool },
    /// A registered voxel field.
    Voxel { field: FieldId },
    /// A block structure.
    Structure {
        target: Arc<dyn StructuralTarget>,
        flags: StructureFlags,
    },
}

impl fmt::Debug for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::Destructible { character } => f
                .debug_struct("Destructible")
                .field("character", character)
                .finish(),
            CandidateKind::Voxel { field } => f.debug_struct("Voxel").field("field", field).finish(),
            CandidateKind::Structure { target, flags } => f
                .debug_struct("Structure")
                .field("target", &target.id())
                .field("flags", flags)
                .finish(),
        }
    }
}

/// A world object the host's spatial index returned for a tool's volume.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entity: EntityId,
    pub owner: Option<OwnerId>,
    /// Bounds in the entity's local frame.
    pub local_aabb: Aabb,
    /// Local-to-world matrix, may be scaled.
    pub world: Matrix4<f32>,
    pub kind: CandidateKind,
}

/// Result of a host raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub position: Point3<f32>,
    pub entity: Option<EntityId>,
    /// Voxel material under the hit, when the host knows it.
    pub material: Option<u8>,
    /// Fraction of the cast length at which the hit happened.
    pub fraction: f32,
}

/// The host's spatial index, as seen by tools.
pub trait SpatialQuery {
    fn entities_in_sphere(&self, center: Point3<f32>, radius: f32) -> Vec<Candidate>;

    /// Entities crossed by the segment, with the fraction at which each is entered.
    fn entities_along_segment(&self, start: Point3<f32>, end: Point3<f32>) -> Vec<(Candidate, f32)>;

    fn raycast(
        &self,
        origin: Point3<f32>,
        direction: Vector3<f32>,
        max_length: f32,
    ) -> Option<RayHit>;

    /// Looks up one entity, used when only the ray's hit entity is a candidate.
    fn candidate(&self, entity: EntityId) -> Option<Candidate>;
}
