use std::{collections::HashMap, sync::Arc};

use crate::core::MtResource;

use super::{
    field::{FieldFlags, FieldPlacement},
    DirtyRange, FieldId, VoxelField,
};

/// Receives "these cells changed" notifications for voxel fields.
///
/// The dispatcher calls this once per field per settled batch, with the union
/// of every range the batch touched in that field.
pub trait RegionChangeSink {
    fn region_changed(&mut self, field: FieldId, range: DirtyRange);
}

impl RegionChangeSink for Vec<(FieldId, DirtyRange)> {
    fn region_changed(&mut self, field: FieldId, range: DirtyRange) {
        self.push((field, range));
    }
}

/// A registered field and the parts of it that can be read without its lock.
#[derive(Clone)]
pub struct FieldEntry {
    handle: MtResource<VoxelField>,
    placement: FieldPlacement,
    flags: Arc<FieldFlags>,
}

impl FieldEntry {
    pub fn handle(&self) -> &MtResource<VoxelField> {
        &self.handle
    }

    pub fn placement(&self) -> &FieldPlacement {
        &self.placement
    }

    pub fn is_closed(&self) -> bool {
        self.flags.is_closed()
    }

    pub fn is_destructible(&self) -> bool {
        self.flags.is_destructible()
    }
}

/// Every voxel field tools may carve, keyed by field id.
///
/// Fields are stored in thread-safe reference-counted wrappers: the registry
/// keeps one handle and every in-flight carve task holds another, so removing
/// a field here never frees it from under a worker.
///
/// Nothing here takes a field's lock. Placement is copied on insert and the
/// closed and destructible flags are shared atomics, so the simulation thread
/// never waits on a worker carving the field.
#[derive(Default)]
pub struct FieldRegistry {
    fields: HashMap<FieldId, FieldEntry>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        FieldRegistry {
            fields: HashMap::new(),
        }
    }

    /// Registers a field, replacing (and closing) any field with the same id.
    ///
    /// # Returns
    ///
    /// The shared handle now stored in the registry.
    pub fn insert(&mut self, field: VoxelField) -> MtResource<VoxelField> {
        let id = field.id;
        let placement = *field.placement();
        let flags = field.flags().clone();
        let handle = MtResource::new(field);
        let entry = FieldEntry {
            handle: handle.clone(),
            placement,
            flags,
        };
        if let Some(previous) = self.fields.insert(id, entry) {
            previous.flags.close();
        }
        handle
    }

    pub fn get(&self, id: FieldId) -> Option<MtResource<VoxelField>> {
        self.fields.get(&id).map(|entry| entry.handle.clone())
    }

    pub fn entry(&self, id: FieldId) -> Option<&FieldEntry> {
        self.fields.get(&id)
    }

    /// Removes a field and marks it closed so pending jobs against it do nothing.
    pub fn remove(&mut self, id: FieldId) -> Option<MtResource<VoxelField>> {
        let removed = self.fields.remove(&id)?;
        removed.flags.close();
        Some(removed.handle)
    }

    pub fn contains(&self, id: FieldId) -> bool {
        self.fields.contains_key(&id)
    }

    /// True if `handle` is the field currently registered under its id and it
    /// hasn't been closed.
    pub fn is_live(&self, id: FieldId, handle: &MtResource<VoxelField>) -> bool {
        self.fields
            .get(&id)
            .is_some_and(|current| current.handle.ptr_eq(handle) && !current.is_closed())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix4, SquareMatrix, Vector3};

    #[test]
    fn removed_fields_are_closed_but_still_reachable_by_holders() {
        let mut registry = FieldRegistry::new();
        let handle = registry.insert(VoxelField::empty(
            9,
            Vector3::new(2, 2, 2),
            Matrix4::identity(),
        ));
        assert!(registry.is_live(9, &handle));

        registry.remove(9);

        assert!(!registry.contains(9));
        assert!(handle.get().is_closed());
        assert!(!registry.is_live(9, &handle));
    }

    #[test]
    fn replacing_a_field_closes_the_old_one() {
        let mut registry = FieldRegistry::new();
        let old = registry.insert(VoxelField::empty(1, Vector3::new(1, 1, 1), Matrix4::identity()));
        let new = registry.insert(VoxelField::empty(1, Vector3::new(1, 1, 1), Matrix4::identity()));

        assert!(old.get().is_closed());
        assert!(registry.is_live(1, &new));
        assert!(!registry.is_live(1, &old));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn entries_answer_while_a_worker_holds_the_field() {
        let mut registry = FieldRegistry::new();
        let handle = registry.insert(VoxelField::filled(
            4,
            Vector3::new(3, 3, 3),
            Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0)),
            1,
        ));

        let _carving = handle.get_mut();
        let entry = registry.entry(4).unwrap();
        assert_eq!(entry.placement().size(), Vector3::new(3, 3, 3));
        assert!(entry.is_destructible() && !entry.is_closed());
        assert!(registry.is_live(4, &handle));

        registry.remove(4);
        assert!(!registry.is_live(4, &handle));
    }
}
