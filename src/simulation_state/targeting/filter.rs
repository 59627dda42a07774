//! Per-candidate filtering after the broad phase.
//!
//! Each candidate is checked against the tool's rules and its effect volume and
//! sorted into one of three buckets: things to damage right away, voxel fields
//! to carve and structures to gather blocks from.

use std::{collections::BTreeSet, sync::Arc};

use log::trace;

use super::{relation, Candidate, CandidateKind, FactionLookup, OwnerId, TargetMask};
use crate::simulation_state::{
    geometry::EffectVolume,
    structures::StructuralTarget,
    tools::{ToolKind, ToolMode},
    voxels::{FieldId, FieldRegistry},
    EntityId,
};

/// The tool-side facts filtering depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterRules {
    pub mode: ToolMode,
    pub kind: ToolKind,
    /// Grid (block tools) or character (hand tools) carrying the tool.
    pub parent: EntityId,
    pub owner: Option<OwnerId>,
    pub damage_characters: bool,
    pub affect_own_grid: bool,
    /// Only accept structures whose relation is in `target_mask`.
    pub use_relations: bool,
    pub target_mask: TargetMask,
}

/// Candidates that passed, grouped by how they will be worked.
#[derive(Default)]
pub struct FilteredTargets {
    pub destructibles: Vec<EntityId>,
    pub fields: Vec<FieldId>,
    pub structures: Vec<Arc<dyn StructuralTarget>>,
}

impl FilteredTargets {
    pub fn is_empty(&self) -> bool {
        self.destructibles.is_empty() && self.fields.is_empty() && self.structures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.destructibles.len() + self.fields.len() + self.structures.len()
    }

    pub fn clear(&mut self) {
        self.destructibles.clear();
        self.fields.clear();
        self.structures.clear();
    }
}

/// Filters `candidates` for a tool, appending the survivors to `out`.
///
/// Duplicate entities are only considered once.
pub fn filter_candidates(
    candidates: &[Candidate],
    volume: &EffectVolume,
    rules: &FilterRules,
    fields: &FieldRegistry,
    factions: &dyn FactionLookup,
    out: &mut FilteredTargets,
) {
    let mut seen = BTreeSet::new();

    for candidate in candidates {
        if !seen.insert(candidate.entity) {
            continue;
        }
        let is_own_parent = candidate.entity == rules.parent;

        match &candidate.kind {
            CandidateKind::Destructible { character } => {
                if *character && !rules.damage_characters {
                    continue;
                }
                if rules.kind == ToolKind::Hand && is_own_parent && !rules.affect_own_grid {
                    continue;
                }
                if volume
                    .contains(&candidate.local_aabb, &candidate.world)
                    .is_disjoint()
                {
                    continue;
                }
                out.destructibles.push(candidate.entity);
            }
            CandidateKind::Voxel { field } => {
                if rules.mode != ToolMode::Drill {
                    continue;
                }
                let Some(entry) = fields.entry(*field) else {
                    trace!("Voxel candidate {} is not a registered field", field);
                    continue;
                };
                if entry.is_closed() || !entry.is_destructible() {
                    continue;
                }
                let placement = entry.placement();
                if volume
                    .contains(&placement.local_aabb(), placement.world())
                    .is_disjoint()
                {
                    continue;
                }
                out.fields.push(*field);
            }
            CandidateKind::Structure { target, flags } => {
                if rules.kind == ToolKind::Block && is_own_parent && !rules.affect_own_grid {
                    continue;
                }
                if target.is_closed() || !flags.editable {
                    continue;
                }
                if rules.use_relations {
                    let relation = relation(rules.owner, candidate.owner, factions);
                    if !rules.target_mask.accepts(relation) {
                        trace!(
                            "Structure {} skipped, relation {:?} not targeted",
                            candidate.entity,
                            relation
                        );
                        continue;
                    }
                }
                if matches!(rules.mode, ToolMode::Grind | ToolMode::Drill)
                    && (flags.immune
                        || !flags.destructible
                        || flags.projected
                        || !flags.physics_enabled)
                {
                    continue;
                }
                if volume
                    .contains(&candidate.local_aabb, &candidate.world)
                    .is_disjoint()
                {
                    continue;
                }
                out.structures.push(target.clone());
            }
        }
    }
}
