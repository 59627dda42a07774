//! # Tool Definitions
//!
//! Read-only configuration for tools, loaded from JSON. One [`ToolDefinitions`]
//! describes a tool model and lists a [`ToolDefinition`] per mode it supports.
//!
//! Every field has a default, so a definition only needs to name what differs:
//!
//! ```json
//! {
//!   "name": "HandDrill",
//!   "kind": "Hand",
//!   "modes": [{ "mode": "Drill", "shape": "Cylinder", "radius": 1.5 }]
//! }
//! ```

use std::sync::Arc;

use cgmath::Vector3;
use log::warn;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simulation_state::{
    geometry::{EffectShape, Location, ShapeParams},
    structures::BlockWork,
    targeting::TargetMask,
    triggers::TriggerSet,
    voxels::{CarveWork, MaterialModifier, MaterialModifiers, WorkOrder},
};

pub type DefinitionResult<T> = Result<T, DefinitionError>;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("malformed tool definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown trigger '{trigger}' in {mode:?} mode")]
    UnknownTrigger { mode: ToolMode, trigger: String },

    #[error("{mode:?} mode has an update interval of zero")]
    ZeroUpdateInterval { mode: ToolMode },

    #[error("tool '{0}' defines no modes")]
    NoModes(String),

    #[error("{mode:?} mode has a negative {field}")]
    NegativeSize { mode: ToolMode, field: &'static str },
}

/// What a tool does to its targets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    FromPrimitive,
)]
#[repr(u8)]
pub enum ToolMode {
    #[default]
    Drill = 0,
    Grind = 1,
    Weld = 2,
}

impl ToolMode {
    /// Decodes a replicated mode byte.
    pub fn from_byte(byte: u8) -> Option<ToolMode> {
        num_traits::FromPrimitive::from_u8(byte)
    }

    pub fn damage_type(self) -> &'static str {
        match self {
            ToolMode::Drill => "Drill",
            ToolMode::Grind => "Grind",
            ToolMode::Weld => "Weld",
        }
    }
}

/// Which action of the current mode is selected.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    FromPrimitive,
)]
#[repr(u8)]
pub enum ActionType {
    #[default]
    Primary = 0,
    Secondary = 1,
    Tertiary = 2,
}

impl ActionType {
    /// Decodes a replicated action byte.
    pub fn from_byte(byte: u8) -> Option<ActionType> {
        num_traits::FromPrimitive::from_u8(byte)
    }
}

/// Where a tool lives: mounted on a grid or held by a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToolKind {
    #[default]
    Block,
    Hand,
}

/// Ratios applied to a mode's base values when an action is selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionValues {
    pub action: ActionType,
    pub size_ratio: f32,
    pub speed_ratio: f32,
    pub harvest_ratio: f32,
}

impl Default for ActionValues {
    fn default() -> Self {
        ActionValues {
            action: ActionType::Primary,
            size_ratio: 1.0,
            speed_ratio: 1.0,
            harvest_ratio: 1.0,
        }
    }
}

/// Effects played while a trigger is set.
///
/// `animation` names a model subpart, `particle` and `beam` name the dummies
/// they are emitted from. Names the model doesn't have are dropped when the tool
/// initialises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDefinition {
    /// A trigger name, composites such as `Firing` included.
    pub trigger: String,
    pub animation: Option<String>,
    pub particle: Option<String>,
    pub beam: Option<String>,
    pub sound: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialModifierDefinition {
    pub material: u8,
    pub speed_ratio: f32,
    pub harvest_ratio: f32,
}

impl Default for MaterialModifierDefinition {
    fn default() -> Self {
        MaterialModifierDefinition {
            material: 0,
            speed_ratio: 1.0,
            harvest_ratio: 1.0,
        }
    }
}

/// Values for one tool mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefinition {
    pub mode: ToolMode,
    pub shape: EffectShape,
    pub work_order: WorkOrder,
    pub location: Location,
    /// Dummy the volume is placed on when `location` is `Emitter`.
    pub emitter: String,
    pub offset: [f32; 3],
    /// Cuboid half extents.
    pub half_extent: [f32; 3],
    /// Sphere and cylinder radius.
    pub radius: f32,
    /// Cylinder, line and ray length.
    pub length: f32,
    pub speed: f32,
    pub harvest_ratio: f32,
    pub destroy_voxels: bool,
    /// Most voxels or blocks one job may work, unlimited when absent.
    pub work_rate: Option<usize>,
    /// Grind and weld modes keep the blocks they worked and skip gathering
    /// while a full `work_rate` of them is still workable.
    pub cache_blocks: bool,
    /// Ticks between work ticks.
    pub update_interval: u32,
    pub idle_power: f32,
    pub active_power: f32,
    pub damage_characters: bool,
    pub affect_own_grid: bool,
    /// Whether target relation controls are on by default.
    pub show_target_controls: bool,
    pub target_mask: TargetMask,
    pub debug: bool,
    pub actions: Vec<ActionValues>,
    pub events: Vec<EventDefinition>,
    pub material_modifiers: Vec<MaterialModifierDefinition>,
}

impl Default for ToolDefinition {
    fn default() -> Self {
        ToolDefinition {
            mode: ToolMode::Drill,
            shape: EffectShape::Sphere,
            work_order: WorkOrder::Uniform,
            location: Location::Centre,
            emitter: "muzzle".to_string(),
            offset: [0.0; 3],
            half_extent: [1.0; 3],
            radius: 1.0,
            length: 1.0,
            speed: 1.0,
            harvest_ratio: 1.0,
            destroy_voxels: true,
            work_rate: None,
            cache_blocks: false,
            update_interval: 20,
            idle_power: 0.0,
            active_power: 1.0,
            damage_characters: true,
            affect_own_grid: false,
            show_target_controls: false,
            target_mask: TargetMask::ALL,
            debug: false,
            actions: Vec::new(),
            events: Vec::new(),
            material_modifiers: Vec::new(),
        }
    }
}

impl ToolDefinition {
    /// Checks sizes, the update interval and event trigger names.
    pub fn validate(&self) -> DefinitionResult<()> {
        if self.update_interval == 0 {
            return Err(DefinitionError::ZeroUpdateInterval { mode: self.mode });
        }

        let sizes = [
            ("radius", self.radius),
            ("length", self.length),
            ("half extent", self.half_extent[0].min(self.half_extent[1]).min(self.half_extent[2])),
        ];
        for (field, value) in sizes {
            if value < 0.0 {
                return Err(DefinitionError::NegativeSize {
                    mode: self.mode,
                    field,
                });
            }
        }
        for action in &self.actions {
            if action.size_ratio < 0.0 {
                return Err(DefinitionError::NegativeSize {
                    mode: self.mode,
                    field: "size ratio",
                });
            }
        }

        for event in &self.events {
            if TriggerSet::from_name(&event.trigger).is_none() {
                return Err(DefinitionError::UnknownTrigger {
                    mode: self.mode,
                    trigger: event.trigger.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every trigger some event listens to.
    pub fn event_mask(&self) -> TriggerSet {
        self.events
            .iter()
            .filter_map(|event| TriggerSet::from_name(&event.trigger))
            .fold(TriggerSet::new(), |mask, set| mask | set)
    }

    /// Ratios for `action`, or neutral ones if the definition doesn't list it.
    pub fn action_values(&self, action: ActionType) -> ActionValues {
        self.actions
            .iter()
            .find(|values| values.action == action)
            .copied()
            .unwrap_or(ActionValues {
                action,
                ..ActionValues::default()
            })
    }

    pub fn offset(&self) -> Vector3<f32> {
        Vector3::from(self.offset)
    }

    /// Shape sizes with `action`'s size ratio applied.
    pub fn shape_params(&self, action: ActionType) -> ShapeParams {
        let ratio = self.action_values(action).size_ratio;
        ShapeParams {
            radius: self.radius * ratio,
            length: self.length * ratio,
            half_extent: Vector3::from(self.half_extent) * ratio,
        }
    }

    pub fn material_modifiers(&self) -> MaterialModifiers {
        self.material_modifiers
            .iter()
            .map(|modifier| {
                (
                    modifier.material,
                    MaterialModifier {
                        speed_ratio: modifier.speed_ratio,
                        harvest_ratio: modifier.harvest_ratio,
                    },
                )
            })
            .collect()
    }

    /// Carve settings for `action`.
    pub fn carve_work(&self, action: ActionType, modifiers: Arc<MaterialModifiers>) -> CarveWork {
        let values = self.action_values(action);
        CarveWork {
            speed: self.speed * values.speed_ratio,
            harvest_ratio: self.harvest_ratio * values.harvest_ratio,
            destroy_voxels: self.destroy_voxels,
            work_order: self.work_order,
            work_rate: self.work_rate,
            modifiers,
        }
    }

    /// Per-block work for `action`.
    pub fn block_work(&self, action: ActionType) -> BlockWork {
        BlockWork {
            mode: self.mode,
            amount: self.speed * self.action_values(action).speed_ratio,
            work_order: self.work_order,
            work_rate: self.work_rate,
            cache_blocks: self.cache_blocks && self.mode != ToolMode::Drill,
        }
    }
}

/// A tool model and the modes it supports.
///
/// Modes are loaded once and shared, every tool built from the collection
/// points at the same definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinitions {
    pub name: String,
    #[serde(default)]
    pub kind: ToolKind,
    pub modes: Vec<Arc<ToolDefinition>>,
}

impl ToolDefinitions {
    /// Validates every mode.
    pub fn validate(&self) -> DefinitionResult<()> {
        if self.modes.is_empty() {
            return Err(DefinitionError::NoModes(self.name.clone()));
        }
        for definition in &self.modes {
            definition.validate()?;
        }
        Ok(())
    }

    /// Modes in definition order.
    ///
    /// A mode listed twice keeps its first definition.
    pub fn shared_modes(&self) -> Vec<Arc<ToolDefinition>> {
        let mut shared: Vec<Arc<ToolDefinition>> = Vec::with_capacity(self.modes.len());
        for definition in &self.modes {
            if shared.iter().any(|existing| existing.mode == definition.mode) {
                warn!(
                    "Tool '{}' defines {:?} more than once, keeping the first",
                    self.name, definition.mode
                );
                continue;
            }
            shared.push(Arc::clone(definition));
        }
        shared
    }
}

/// Parses and validates a tool definition document.
pub fn load_json(text: &str) -> DefinitionResult<ToolDefinitions> {
    let definitions: ToolDefinitions = serde_json::from_str(text)?;
    definitions.validate()?;
    Ok(definitions)
}
