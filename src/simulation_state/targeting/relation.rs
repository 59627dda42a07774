use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identity of a player or other owner.
pub type OwnerId = u64;
pub type FactionId = u32;

/// How a tool's owner relates to a target's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    Own,
    Friendly,
    Neutral,
    Hostile,
}

impl Relation {
    pub fn bit(self) -> u8 {
        match self {
            Relation::Own => TargetMask::OWN.0,
            Relation::Friendly => TargetMask::FRIENDLY.0,
            Relation::Neutral => TargetMask::NEUTRAL.0,
            Relation::Hostile => TargetMask::HOSTILE.0,
        }
    }
}

/// Standing between two factions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactionRelation {
    Enemies,
    Neutral,
    Friends,
}

/// Set of relations a tool is allowed to work on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetMask(pub u8);

impl TargetMask {
    pub const NONE: TargetMask = TargetMask(0);
    pub const OWN: TargetMask = TargetMask(1);
    pub const FRIENDLY: TargetMask = TargetMask(2);
    pub const NEUTRAL: TargetMask = TargetMask(4);
    pub const HOSTILE: TargetMask = TargetMask(8);
    pub const ALL: TargetMask = TargetMask(15);

    pub fn from_relations(relations: &[Relation]) -> Self {
        TargetMask(relations.iter().fold(0, |mask, r| mask | r.bit()))
    }

    pub fn accepts(self, relation: Relation) -> bool {
        self.0 & relation.bit() != 0
    }

    pub fn with(self, relation: Relation) -> Self {
        TargetMask(self.0 | relation.bit())
    }

    pub fn without(self, relation: Relation) -> Self {
        TargetMask(self.0 & !relation.bit())
    }
}

impl Default for TargetMask {
    fn default() -> Self {
        TargetMask::ALL
    }
}

/// Faction membership and diplomacy, provided by the host.
pub trait FactionLookup {
    fn faction_of(&self, owner: OwnerId) -> Option<FactionId>;

    fn relation_between(&self, a: FactionId, b: FactionId) -> FactionRelation;
}

/// Works out how `tool_owner` relates to `target_owner`.
///
/// Matching owners are `Own`, two unowned sides included. A single unowned
/// side is `Neutral`. Two different owners are `Hostile` unless both belong to factions, in which case the same
/// faction is `Friendly` and otherwise the factions' standing decides.
pub fn relation(
    tool_owner: Option<OwnerId>,
    target_owner: Option<OwnerId>,
    factions: &dyn FactionLookup,
) -> Relation {
    if tool_owner == target_owner {
        return Relation::Own;
    }
    let (Some(tool_owner), Some(target_owner)) = (tool_owner, target_owner) else {
        return Relation::Neutral;
    };

    match (factions.faction_of(tool_owner), factions.faction_of(target_owner)) {
        (Some(a), Some(b)) if a == b => Relation::Friendly,
        (Some(a), Some(b)) => match factions.relation_between(a, b) {
            FactionRelation::Enemies => Relation::Hostile,
            FactionRelation::Friends => Relation::Friendly,
            FactionRelation::Neutral => Relation::Neutral,
        },
        _ => Relation::Hostile,
    }
}

/// A fixed faction table.
#[derive(Debug, Clone, Default)]
pub struct FactionTable {
    members: HashMap<OwnerId, FactionId>,
    standings: HashMap<(FactionId, FactionId), FactionRelation>,
}

impl FactionTable {
    pub fn new() -> Self {
        FactionTable::default()
    }

    pub fn join(&mut self, owner: OwnerId, faction: FactionId) {
        self.members.insert(owner, faction);
    }

    /// Sets the standing between two factions, both ways.
    pub fn set_relation(&mut self, a: FactionId, b: FactionId, relation: FactionRelation) {
        self.standings.insert((a, b), relation);
        self.standings.insert((b, a), relation);
    }
}

impl FactionLookup for FactionTable {
    fn faction_of(&self, owner: OwnerId) -> Option<FactionId> {
        self.members.get(&owner).copied()
    }

    fn relation_between(&self, a: FactionId, b: FactionId) -> FactionRelation {
        self.standings
            .get(&(a, b))
            .copied()
            .unwrap_or(FactionRelation::Neutral)
    }
}
