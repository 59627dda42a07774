use std::{collections::BTreeMap, sync::Arc};

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

use crate::{
    core::MtResource,
    simulation_state::{
        geometry::{intersect, Aabb, Containment, Obb},
        structures::{BlockGrid, StructuralTarget},
        targeting::{Candidate, CandidateKind, OwnerId, RayHit, SpatialQuery, StructureFlags},
        voxels::{FieldId, VoxelField},
        EntityId,
    },
};

/// Fraction of a cell the voxel ray march advances per step.
const MARCH_STEP: f32 = 0.25;

/// A flat list of world objects answering spatial queries by brute force.
///
/// Good enough for a handful of entities. Voxel fields are ray-marched cell by
/// cell so the reported hit lands on solid material.
#[derive(Default)]
pub struct DemoWorld {
    candidates: Vec<Candidate>,
    fields: BTreeMap<FieldId, MtResource<VoxelField>>,
}

impl DemoWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `candidate`, replacing any entity with the same id.
    pub fn add(&mut self, candidate: Candidate) {
        self.remove(candidate.entity);
        self.candidates.push(candidate);
    }

    pub fn add_field(&mut self, field: MtResource<VoxelField>, owner: Option<OwnerId>) {
        let candidate = {
            let data = field.get();
            Candidate {
                entity: data.id,
                owner,
                local_aabb: data.local_aabb(),
                world: *data.world(),
                kind: CandidateKind::Voxel { field: data.id },
            }
        };
        let id = candidate.entity;
        self.add(candidate);
        self.fields.insert(id, field);
    }

    pub fn add_structure(
        &mut self,
        grid: Arc<BlockGrid>,
        owner: Option<OwnerId>,
        flags: StructureFlags,
    ) {
        let candidate = Candidate {
            entity: grid.id(),
            owner,
            local_aabb: grid.local_aabb(),
            world: *grid.world(),
            kind: CandidateKind::Structure {
                target: grid,
                flags,
            },
        };
        self.add(candidate);
    }

    /// Adds an axis-aligned destructible, such as a character or a crate.
    pub fn add_destructible(
        &mut self,
        entity: EntityId,
        owner: Option<OwnerId>,
        center: Point3<f32>,
        half_extent: Vector3<f32>,
        character: bool,
    ) {
        self.add(Candidate {
            entity,
            owner,
            local_aabb: Aabb::from_center_half_extents(Point3::origin(), half_extent),
            world: cgmath::Matrix4::from_translation(center.to_vec()),
            kind: CandidateKind::Destructible { character },
        });
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<Candidate> {
        self.fields.remove(&entity);
        let index = self.candidates.iter().position(|c| c.entity == entity)?;
        Some(self.candidates.remove(index))
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn obb(candidate: &Candidate) -> Obb {
        Obb::from_local_aabb(&candidate.local_aabb, &candidate.world)
    }

    /// First solid cell of `field` between the two fractions of the segment.
    fn march_field(
        field: &VoxelField,
        start: Point3<f32>,
        end: Point3<f32>,
        from: f32,
    ) -> Option<(f32, u8)> {
        let local_start = field.to_local(start);
        let local_end = field.to_local(end);
        let cells = (local_end - local_start).magnitude();
        let steps = ((cells / MARCH_STEP).ceil() as usize).max(1);

        (0..=steps)
            .map(|i| i as f32 / steps as f32)
            .filter(|t| *t >= from)
            .find_map(|t| {
                let p = local_start + (local_end - local_start) * t;
                let cell = Point3::new(p.x.round() as i32, p.y.round() as i32, p.z.round() as i32);
                field
                    .cell(cell)
                    .filter(|c| c.is_solid())
                    .map(|c| (t, c.material))
            })
    }
}

impl SpatialQuery for DemoWorld {
    fn entities_in_sphere(&self, center: Point3<f32>, radius: f32) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| intersect::sphere_obb(center, radius, &Self::obb(c)) != Containment::Disjoint)
            .cloned()
            .collect()
    }

    fn entities_along_segment(&self, start: Point3<f32>, end: Point3<f32>) -> Vec<(Candidate, f32)> {
        let mut hits: Vec<(Candidate, f32)> = self
            .candidates
            .iter()
            .filter_map(|c| intersect::segment_obb(start, end, &Self::obb(c)).map(|t| (c.clone(), t)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    fn raycast(
        &self,
        origin: Point3<f32>,
        direction: Vector3<f32>,
        max_length: f32,
    ) -> Option<RayHit> {
        if direction.magnitude2() <= f32::EPSILON || max_length <= 0.0 {
            return None;
        }
        let end = origin + direction.normalize() * max_length;

        let mut best: Option<(f32, EntityId, Option<u8>)> = None;
        for candidate in &self.candidates {
            let Some(entry) = intersect::segment_obb(origin, end, &Self::obb(candidate)) else {
                continue;
            };
            let hit = match &candidate.kind {
                CandidateKind::Voxel { field } => {
                    let Some(handle) = self.fields.get(field) else {
                        continue;
                    };
                    let data = handle.get();
                    Self::march_field(&data, origin, end, entry)
                        .map(|(t, material)| (t, Some(material)))
                }
                _ => Some((entry, None)),
            };
            if let Some((t, material)) = hit {
                if best.map_or(true, |(best_t, _, _)| t < best_t) {
                    best = Some((t, candidate.entity, material));
                }
            }
        }

        best.map(|(t, entity, material)| RayHit {
            position: origin + (end - origin) * t,
            entity: Some(entity),
            material,
            fraction: t,
        })
    }

    fn candidate(&self, entity: EntityId) -> Option<Candidate> {
        self.candidates.iter().find(|c| c.entity == entity).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Matrix4;

    fn world_with_field() -> DemoWorld {
        let mut world = DemoWorld::new();
        let field = VoxelField::filled(
            10,
            Vector3::new(4, 4, 4),
            Matrix4::from_translation(Vector3::new(-2.0, -2.0, -10.0)),
            3,
        );
        world.add_field(MtResource::new(field), None);
        world.add_destructible(
            20,
            Some(5),
            Point3::new(0.0, 0.0, -3.0),
            Vector3::new(0.5, 0.5, 0.5),
            true,
        );
        world
    }

    #[test]
    fn ray_stops_at_the_nearest_entity() {
        let world = world_with_field();
        let hit = world
            .raycast(Point3::origin(), -Vector3::unit_z(), 20.0)
            .unwrap();

        assert_eq!(hit.entity, Some(20));
        assert!((hit.position.z + 2.5).abs() < 1e-3);
        assert_eq!(hit.material, None);
    }

    #[test]
    fn ray_into_a_field_reports_its_material() {
        let mut world = world_with_field();
        world.remove(20);
        let hit = world
            .raycast(Point3::origin(), -Vector3::unit_z(), 20.0)
            .unwrap();

        assert_eq!(hit.entity, Some(10));
        assert_eq!(hit.material, Some(3));
        assert!(hit.position.z < -6.5 && hit.position.z > -7.5);
    }

    #[test]
    fn sphere_query_skips_distant_entities() {
        let world = world_with_field();

        let near = world.entities_in_sphere(Point3::new(0.0, 0.0, -3.0), 0.5);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].entity, 20);

        let segment = world.entities_along_segment(Point3::origin(), Point3::new(0.0, 0.0, -20.0));
        let order: Vec<_> = segment.iter().map(|(c, _)| c.entity).collect();
        assert_eq!(order, vec![20, 10]);
    }
}
