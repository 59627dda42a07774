//! # Voxel Fields
//!
//! Storage and carving for the volumetric targets tools dig into.
//!
//! ## Architecture
//!
//! * **Field**: A dense box of two-byte cells (density + material) with an
//!   occupancy bit vector, placed in the world by a possibly scaled matrix
//! * **Registry**: Every carvable field, held in `MtResource` so workers and the
//!   simulation thread share them
//! * **Carve**: Per-shape membership, work order, removal and yield math
//! * **Tasks**: The worker-side carve job and its merge
//!
//! ## Thread Safety
//!
//! A carve job holds its field's write lock from the first read to the last
//! write. Jobs on different fields run in parallel; jobs on the same field run
//! one after another. The simulation thread reads placement and flags from the
//! registry and never takes a field's lock.

pub mod carve;
pub mod dirty_range;
pub mod field;
pub mod registry;
pub mod tasks;

pub use carve::{
    carve, carve_region, CarveParams, CarveReport, CarveWork, MaterialModifier, MaterialModifiers,
    PhaseTimings, WorkOrder,
};
pub use dirty_range::DirtyRange;
pub use field::{FieldFlags, FieldId, FieldPlacement, VoxelCell, VoxelField, FULL_DENSITY};
pub use registry::{FieldEntry, FieldRegistry, RegionChangeSink};
pub use tasks::carve_task::{CarveTask, CarveTaskResult};
