//! # Targeting
//!
//! Finding what a tool's volume touches and deciding what it may work on.
//!
//! ## Key Components
//! - `SpatialQuery`: The host's spatial index (sphere, segment and ray queries)
//! - `Candidate`: One object the broad phase returned
//! - `relation` / `TargetMask`: Ownership and faction based target selection
//! - `filter_candidates`: Per-candidate rules and the narrow-phase test

pub mod candidate;
pub mod filter;
pub mod relation;

pub use candidate::{Candidate, CandidateKind, RayHit, SpatialQuery, StructureFlags};
pub use filter::{filter_candidates, FilterRules, FilteredTargets};
pub use relation::{
    relation, FactionId, FactionLookup, FactionRelation, FactionTable, OwnerId, Relation,
    TargetMask,
};
