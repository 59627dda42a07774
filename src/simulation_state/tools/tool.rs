//! # Tool Instance
//!
//! Everything one tool remembers between ticks: its modes, the host-reported
//! state (functional, powered, enabled, transforms), what the user asked it to
//! do (activated, shooting, mode and action), its triggers and effects, and the
//! bookkeeping for the batch of jobs it has in flight.
//!
//! The per-tick work itself lives in the orchestrator; this type only keeps the
//! state consistent as flags change.

use std::{collections::BTreeMap, sync::Arc};

use cgmath::{EuclideanSpace, Point3};
use log::{debug, info, trace, warn};
use thiserror::Error;

use super::definition::{
    ActionType, DefinitionError, ToolDefinition, ToolDefinitions, ToolKind, ToolMode,
};
use crate::simulation_state::{
    geometry::{compute_pose, DummyTable, ModelLayout, Placement, Pose, ToolTransforms},
    targeting::{Candidate, FilteredTargets, OwnerId, TargetMask},
    task_management::BatchState,
    triggers::{
        Effect, EffectResources, ModeTriggers, Monitor, TransitionReport, Trigger,
        TriggerSet, TriggerStateMachine,
    },
    voxels::MaterialModifiers,
    EntityId,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {tool} has no usable modes")]
    NoModes { tool: EntityId },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// What the host knows about a tool when it is created.
#[derive(Debug, Clone)]
pub struct ToolSpawn {
    pub id: EntityId,
    pub owner: Option<OwnerId>,
    /// Grid for block tools, character for hand tools.
    pub parent: EntityId,
    pub layout: ModelLayout,
    pub transforms: ToolTransforms,
}

/// Per-mode data resolved once when the tool is created.
#[derive(Debug, Clone)]
pub struct ModeData {
    pub definition: Arc<ToolDefinition>,
    /// The tick phase on which this mode does its work.
    pub work_tick: u64,
    pub placement: Placement,
    pub modifiers: Arc<MaterialModifiers>,
}

/// Result of the last raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitInfo {
    pub valid: bool,
    pub position: Point3<f32>,
    pub material: Option<u8>,
}

impl Default for HitInfo {
    fn default() -> Self {
        HitInfo {
            valid: false,
            position: Point3::origin(),
            material: None,
        }
    }
}

pub struct ToolInstance {
    id: EntityId,
    owner: Option<OwnerId>,
    kind: ToolKind,
    parent: EntityId,
    name: String,

    slots: Vec<ModeData>,
    mode_map: BTreeMap<ToolMode, usize>,
    mode: ToolMode,
    action: ActionType,
    gun_action: ActionType,

    functional: bool,
    functional_init: bool,
    powered: bool,
    enabled: bool,
    activated: bool,
    shooting: bool,
    power_available: f32,
    update_power: bool,

    transforms: ToolTransforms,
    dummies: DummyTable,
    triggers: TriggerStateMachine,

    pub(crate) batch: BatchState,
    was_hitting: bool,
    hit: HitInfo,

    use_relations: bool,
    target_mask: TargetMask,
    av_active: bool,

    pub(crate) candidates: Vec<Candidate>,
    pub(crate) targets: FilteredTargets,
}

impl ToolInstance {
    /// Creates a tool from its definitions.
    ///
    /// # Arguments
    /// * `spawn` - Host-side identity, model layout and initial transforms
    /// * `definitions` - The tool's definitions, one per mode
    ///
    /// # Returns
    /// The tool, starting in the first mode its definitions list, or an error
    /// if the definitions are invalid or yield no mode.
    pub fn new(spawn: ToolSpawn, definitions: &ToolDefinitions) -> Result<Self, ToolError> {
        definitions.validate()?;

        let dummies = DummyTable::build(&spawn.layout);
        let mut slots = Vec::new();
        let mut mode_map = BTreeMap::new();
        for definition in definitions.shared_modes() {
            let placement = Placement::resolve(
                definition.location,
                definition.offset(),
                &definition.emitter,
                &dummies,
            );
            mode_map.insert(definition.mode, slots.len());
            slots.push(ModeData {
                work_tick: spawn.id % u64::from(definition.update_interval),
                placement,
                modifiers: Arc::new(definition.material_modifiers()),
                definition,
            });
        }

        let Some(first) = slots.first() else {
            return Err(ToolError::NoModes { tool: spawn.id });
        };
        let mode = first.definition.mode;
        let use_relations = first.definition.show_target_controls;
        let target_mask = first.definition.target_mask;

        let triggers = TriggerStateMachine::new(
            slots
                .iter()
                .map(|slot| ModeTriggers::new(slot.definition.event_mask()))
                .collect(),
        );

        info!(
            "Created {:?} tool '{}' ({}) with {} mode(s)",
            definitions.kind,
            definitions.name,
            spawn.id,
            slots.len()
        );

        Ok(ToolInstance {
            id: spawn.id,
            owner: spawn.owner,
            kind: definitions.kind,
            parent: spawn.parent,
            name: definitions.name.clone(),
            slots,
            mode_map,
            mode,
            action: ActionType::Primary,
            gun_action: ActionType::Primary,
            functional: true,
            functional_init: false,
            powered: definitions.kind == ToolKind::Hand,
            enabled: true,
            activated: false,
            shooting: false,
            power_available: 0.0,
            update_power: true,
            transforms: spawn.transforms,
            dummies,
            triggers,
            batch: BatchState::default(),
            was_hitting: false,
            hit: HitInfo::default(),
            use_relations,
            target_mask,
            av_active: false,
            candidates: Vec::new(),
            targets: FilteredTargets::default(),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn parent(&self) -> EntityId {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    /// Modes this tool supports, in slot order.
    pub fn modes(&self) -> impl Iterator<Item = ToolMode> + '_ {
        self.slots.iter().map(|slot| slot.definition.mode)
    }

    pub fn mode_data(&self) -> &ModeData {
        let slot = self.mode_map.get(&self.mode).copied().unwrap_or(0);
        &self.slots[slot.min(self.slots.len() - 1)]
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.mode_data().definition
    }

    /// The action in use: the gun action while shooting, the selected one otherwise.
    pub fn current_action(&self) -> ActionType {
        if self.shooting {
            self.gun_action
        } else {
            self.action
        }
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn is_shooting(&self) -> bool {
        self.shooting
    }

    /// Activated or shooting.
    pub fn is_firing(&self) -> bool {
        self.activated || self.shooting
    }

    pub fn is_operational(&self) -> bool {
        self.functional && self.powered && self.enabled
    }

    pub fn transforms(&self) -> &ToolTransforms {
        &self.transforms
    }

    pub fn set_transforms(&mut self, transforms: ToolTransforms) {
        self.transforms = transforms;
    }

    pub fn dummies(&self) -> &DummyTable {
        &self.dummies
    }

    pub fn hit_info(&self) -> &HitInfo {
        &self.hit
    }

    pub fn was_hitting(&self) -> bool {
        self.was_hitting
    }

    pub fn batch(&self) -> &BatchState {
        &self.batch
    }

    /// Total harvested per material.
    pub fn harvested(&self) -> &BTreeMap<u8, f32> {
        self.batch.harvested()
    }

    pub fn uses_relations(&self) -> bool {
        self.use_relations
    }

    pub fn set_use_relations(&mut self, use_relations: bool) {
        self.use_relations = use_relations;
    }

    pub fn target_mask(&self) -> TargetMask {
        self.target_mask
    }

    pub fn set_target_mask(&mut self, mask: TargetMask) {
        self.target_mask = mask;
    }

    /// Whether the effect consumer should be looking at this tool.
    pub fn is_av_active(&self) -> bool {
        self.av_active
    }

    pub fn triggers(&self) -> &TriggerStateMachine {
        &self.triggers
    }

    pub fn effects(&self) -> &[Effect] {
        self.triggers.effects()
    }

    /// Mutable effects, for the consumer to reap and acknowledge.
    pub fn effects_mut(&mut self) -> &mut [Effect] {
        self.triggers.effects_mut()
    }

    pub fn active_effects(&self) -> impl Iterator<Item = &Effect> {
        self.triggers.active_effects()
    }

    pub fn add_monitor(&mut self, monitor: Monitor) {
        self.triggers.add_monitor(monitor);
    }

    pub fn is_work_tick(&self, tick: u64) -> bool {
        let data = self.mode_data();
        tick % u64::from(data.definition.update_interval) == data.work_tick
    }

    /// Power the tool asks for right now.
    pub fn required_power(&self) -> f32 {
        if !self.functional || !self.enabled {
            return 0.0;
        }
        let definition = self.definition();
        if self.is_firing() {
            definition.active_power
        } else {
            definition.idle_power
        }
    }

    /// Records how much power the host can give the tool.
    ///
    /// Block tools pick the value up on their next power poll. Hand tools run
    /// off their carrier and only care whether any is left.
    pub fn set_power_available(&mut self, available: f32, tick: u64) {
        self.power_available = available;
        match self.kind {
            ToolKind::Block => self.update_power = true,
            ToolKind::Hand => self.apply_power(available > 0.0, tick),
        }
    }

    pub(crate) fn needs_power_poll(&self) -> bool {
        self.update_power
    }

    /// Re-evaluates power from the last reported availability.
    pub(crate) fn poll_power(&mut self, tick: u64) {
        let required = self.required_power();
        let powered = required <= f32::EPSILON || self.power_available >= required;
        self.update_power = false;
        self.apply_power(powered, tick);
    }

    fn apply_power(&mut self, powered: bool, tick: u64) {
        if powered == self.powered {
            return;
        }
        debug!("Tool {} powered: {}", self.id, powered);
        self.powered = powered;
        self.update_triggers(Trigger::Powered.into(), powered, tick);
        if !powered {
            self.was_hitting = false;
            self.update_hit_info(None, tick);
        }
    }

    /// Host report of whether the tool is built and undamaged.
    pub fn set_functional(&mut self, functional: bool, tick: u64) {
        if functional == self.functional {
            return;
        }
        self.functional = functional;
        self.update_power = true;
        self.update_triggers(Trigger::Functional.into(), functional, tick);
    }

    /// Turns a block tool on or off.
    pub fn set_enabled(&mut self, enabled: bool, tick: u64) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        self.update_power = true;

        if !enabled {
            self.was_hitting = false;
            self.update_hit_info(None, tick);
        }
        if !self.powered {
            return;
        }
        self.update_triggers(Trigger::Enabled.into(), enabled, tick);
    }

    /// Switches the tool on or off.
    ///
    /// # Returns
    /// `false` when activation was refused because the tool isn't operational.
    pub fn set_activated(&mut self, activated: bool, tick: u64) -> bool {
        if activated == self.activated {
            return true;
        }
        if activated && !self.is_operational() {
            debug!("Tool {} can't activate while not operational", self.id);
            return false;
        }

        self.activated = activated;
        self.update_power = true;
        self.update_triggers(Trigger::Activated.into(), activated, tick);
        if !activated {
            self.update_hit_info(None, tick);
        }
        true
    }

    /// Starts shooting with `action`: Primary maps to LeftClick, anything else to RightClick.
    pub fn begin_shooting(&mut self, action: ActionType, tick: u64) {
        self.gun_action = action;
        self.shooting = true;
        self.update_power = true;
        self.update_triggers(click_trigger(action).into(), true, tick);
    }

    pub fn end_shooting(&mut self, tick: u64) {
        if !self.shooting {
            return;
        }
        self.shooting = false;
        self.update_power = true;
        self.update_triggers(TriggerSet::click(), false, tick);
    }

    /// Switches to `mode`.
    ///
    /// # Returns
    /// `true` if the tool changed mode. Unsupported modes are refused with a warning.
    pub fn set_mode(&mut self, mode: ToolMode, tick: u64) -> bool {
        if mode == self.mode {
            return false;
        }
        let Some(slot) = self.mode_map.get(&mode).copied() else {
            warn!("Tool {} has no {:?} mode", self.id, mode);
            return false;
        };

        self.mode = mode;
        self.update_power = true;
        self.batch.clear_work_set();
        self.triggers.switch_mode(slot, tick);
        debug!("Tool {} switched to {:?}", self.id, mode);
        true
    }

    pub fn set_action(&mut self, action: ActionType) {
        self.action = action;
    }

    /// Adds or removes triggers, keeping the hit latch and hit info in step.
    pub fn update_triggers(&mut self, triggers: TriggerSet, add: bool, tick: u64) -> TransitionReport {
        let report = self.triggers.update(triggers, add, self.is_firing(), tick);
        if report.removed.contains(Trigger::Hit) {
            self.was_hitting = false;
        }
        if report.removed.contains(Trigger::RayHit) {
            self.hit.valid = false;
        }
        report
    }

    /// Records the latest raycast. `None` clears it.
    pub fn update_hit_info(&mut self, hit: Option<(Point3<f32>, Option<u8>)>, tick: u64) {
        match hit {
            Some((position, material)) => {
                self.hit.position = position;
                self.hit.material = material;
                if self.hit.valid {
                    return;
                }
                self.update_triggers(Trigger::RayHit.into(), true, tick);
                self.hit.valid = true;
            }
            None => {
                if !self.hit.valid {
                    return;
                }
                self.update_triggers(Trigger::RayHit.into(), false, tick);
                self.hit.valid = false;
            }
        }
    }

    pub(crate) fn is_functional_initialized(&self) -> bool {
        self.functional_init
    }

    /// Builds every mode's effects and raises `Functional`, along with
    /// `Powered` and `Enabled` if they already hold.
    ///
    /// Effects that name a subpart or dummy the model doesn't have lose that
    /// resource with a warning.
    pub(crate) fn functional_init(&mut self, tick: u64) {
        self.functional_init = true;

        for (slot, data) in self.slots.iter().enumerate() {
            let mut effects = Vec::new();
            for event in &data.definition.events {
                let Some(triggers) = TriggerSet::from_name(&event.trigger) else {
                    continue;
                };
                let resources = EffectResources {
                    animation: self.checked(&event.animation, "subpart", |name| {
                        self.dummies.subpart_index(name).is_some()
                    }),
                    particle: self.checked(&event.particle, "dummy", |name| {
                        self.dummies.dummy_index(name).is_some()
                    }),
                    beam: self.checked(&event.beam, "dummy", |name| {
                        self.dummies.dummy_index(name).is_some()
                    }),
                    sound: event.sound.clone(),
                };
                effects.extend(
                    triggers
                        .iter()
                        .map(|trigger| Effect::new(trigger, resources.clone())),
                );
            }
            trace!("Tool {} slot {} has {} effect(s)", self.id, slot, effects.len());
            self.triggers.set_effects(slot, effects);
        }

        let mut raised = TriggerSet::single(Trigger::Functional);
        if self.powered {
            raised.insert(Trigger::Powered);
            if self.enabled {
                raised.insert(Trigger::Enabled);
            }
        }
        self.update_triggers(raised, true, tick);
    }

    fn checked(
        &self,
        name: &Option<String>,
        what: &str,
        exists: impl Fn(&str) -> bool,
    ) -> Option<String> {
        let name = name.as_ref()?;
        if exists(name) {
            Some(name.clone())
        } else {
            warn!("Tool {} has no {} '{}', skipping it", self.id, what, name);
            None
        }
    }

    /// Where the current mode's volume sits, before any raycast.
    pub fn pose(&self) -> Pose {
        compute_pose(&self.mode_data().placement, &self.transforms, &self.dummies, None)
    }

    /// Like `pose`, but a `Hit` placement moves to `hit`.
    pub fn pose_at_hit(&self, hit: Point3<f32>) -> Pose {
        compute_pose(
            &self.mode_data().placement,
            &self.transforms,
            &self.dummies,
            Some(hit),
        )
    }

    /// Publishes the batch's hit outcome and starts the next batch.
    ///
    /// # Returns
    /// Whether the tool is hitting.
    pub(crate) fn finalize_hit(&mut self, tick: u64) -> bool {
        let working = self.batch.take_working();
        let hitting = self.is_operational() && working && self.is_firing();
        if hitting != self.was_hitting {
            self.update_triggers(Trigger::Hit.into(), hitting, tick);
            self.was_hitting = hitting;
        }
        hitting
    }

    /// Tracks whether the tool has anything for the effect consumer.
    pub(crate) fn track_av(&mut self) {
        let showing = !self.triggers.available().is_empty();
        if !self.av_active && showing {
            self.av_active = true;
        } else if self.av_active && !showing && self.active_effects().next().is_none() {
            self.av_active = false;
        }
    }
}

fn click_trigger(action: ActionType) -> Trigger {
    match action {
        ActionType::Primary => Trigger::LeftClick,
        ActionType::Secondary | ActionType::Tertiary => Trigger::RightClick,
    }
}
