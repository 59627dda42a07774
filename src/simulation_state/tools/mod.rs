//! # Tools
//!
//! Tool definitions, the state of a tool instance and the per-tick sequence
//! that turns that state into damage and jobs.
//!
//! ## Key Components
//! - `ToolDefinitions` / `load_json`: Read-only configuration, one entry per mode
//! - `ToolInstance`: Flags, modes, triggers and in-flight batch of one tool
//! - `update_tool`: One tick of one tool

pub mod definition;
pub mod orchestrator;
pub mod tool;

pub use definition::{
    load_json, ActionType, ActionValues, DefinitionError, EventDefinition, ToolDefinition,
    ToolDefinitions, ToolKind, ToolMode,
};
pub use orchestrator::{update_tool, TickOutcome, UpdateContext, INSTANT_DAMAGE};
pub use tool::{HitInfo, ModeData, ToolError, ToolInstance, ToolSpawn};
