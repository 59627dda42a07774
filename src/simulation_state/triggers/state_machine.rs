//! # Trigger State Machine
//!
//! Keeps the raw trigger set of a tool, the subset its current mode reacts to,
//! and the effects bound to those triggers.
//!
//! ## Transitions
//! - **ADD** sets every requested trigger that isn't set yet.
//! - **REMOVE** does nothing unless one of the requested triggers is set. It
//!   then clears every set trigger at or above the lowest requested one, so
//!   dropping `Activated` also drops `Hit` and `RayHit`.
//! - A REMOVE touching the Firing family is ignored while the tool is still
//!   activated or shooting (see [`keeps_firing`]).
//!
//! Each changed trigger that the current mode listens to updates the
//! available set, is reported to the monitors and starts or expires the
//! effects bound to it.

use std::fmt;

use log::{trace, warn};

use super::{
    effects::{Activation, Effect},
    keeps_firing, Trigger, TriggerSet,
};

/// Callback told about every trigger change the current mode listens to.
pub type Monitor = Box<dyn FnMut(Trigger, bool) + Send>;

/// The triggers one mode listens to and the effects bound to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeTriggers {
    event_mask: TriggerSet,
    effects: Vec<Effect>,
}

impl ModeTriggers {
    pub fn new(event_mask: TriggerSet) -> Self {
        ModeTriggers {
            event_mask,
            effects: Vec::new(),
        }
    }

    pub fn event_mask(&self) -> TriggerSet {
        self.event_mask
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }
}

/// What a single `update` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub added: TriggerSet,
    pub removed: TriggerSet,
    /// The keep-firing guard swallowed the request.
    pub suppressed: bool,
}

impl TransitionReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct TriggerStateMachine {
    raw: TriggerSet,
    available: TriggerSet,
    modes: Vec<ModeTriggers>,
    current: usize,
    monitors: Vec<Monitor>,
}

impl TriggerStateMachine {
    /// Creates a state machine for the given mode slots, starting in slot 0.
    pub fn new(modes: Vec<ModeTriggers>) -> Self {
        TriggerStateMachine {
            raw: TriggerSet::new(),
            available: TriggerSet::new(),
            modes,
            current: 0,
            monitors: Vec::new(),
        }
    }

    /// Every trigger currently set.
    pub fn raw(&self) -> TriggerSet {
        self.raw
    }

    /// The set triggers the current mode listens to.
    pub fn available(&self) -> TriggerSet {
        self.available
    }

    pub fn contains(&self, trigger: Trigger) -> bool {
        self.raw.contains(trigger)
    }

    pub fn current_mode(&self) -> usize {
        self.current
    }

    pub fn mode_count(&self) -> usize {
        self.modes.len()
    }

    pub fn mode(&self, slot: usize) -> Option<&ModeTriggers> {
        self.modes.get(slot)
    }

    /// Highest-priority trigger the current mode is showing.
    pub fn winning(&self) -> Option<Trigger> {
        self.available.winning()
    }

    pub fn add_monitor(&mut self, monitor: Monitor) {
        self.monitors.push(monitor);
    }

    /// Replaces the effects of a mode slot. Unknown slots are ignored.
    pub fn set_effects(&mut self, slot: usize, effects: Vec<Effect>) {
        match self.modes.get_mut(slot) {
            Some(mode) => mode.effects = effects,
            None => warn!("No mode slot {} to attach effects to", slot),
        }
    }

    /// Effects of the current mode.
    pub fn effects(&self) -> &[Effect] {
        self.modes
            .get(self.current)
            .map(|mode| mode.effects.as_slice())
            .unwrap_or(&[])
    }

    pub fn effects_mut(&mut self) -> &mut [Effect] {
        self.modes
            .get_mut(self.current)
            .map(|mode| mode.effects.as_mut_slice())
            .unwrap_or(&mut [])
    }

    /// Effects of the current mode that are still playing, expiring ones included.
    pub fn active_effects(&self) -> impl Iterator<Item = &Effect> {
        self.effects().iter().filter(|effect| effect.is_active())
    }

    fn event_mask(&self) -> TriggerSet {
        self.modes
            .get(self.current)
            .map(ModeTriggers::event_mask)
            .unwrap_or_default()
    }

    /// Adds or removes `requested`.
    ///
    /// # Arguments
    /// * `requested` - Triggers to add or remove
    /// * `add` - ADD when true, REMOVE otherwise
    /// * `activated_or_shooting` - Whether the tool is still firing, for the keep-firing guard
    /// * `tick` - Current simulation tick, stamped on started effects
    ///
    /// # Returns
    /// The triggers that actually changed.
    pub fn update(
        &mut self,
        requested: TriggerSet,
        add: bool,
        activated_or_shooting: bool,
        tick: u64,
    ) -> TransitionReport {
        if keeps_firing(add, requested, activated_or_shooting) {
            trace!("Keeping {:?} while the tool is firing", requested);
            return TransitionReport {
                suppressed: true,
                ..TransitionReport::default()
            };
        }

        let changed = if add {
            requested - self.raw
        } else if requested.intersects(self.raw) {
            match requested.lowest() {
                Some(lowest) => self.raw & TriggerSet::at_or_above(lowest),
                None => TriggerSet::new(),
            }
        } else {
            TriggerSet::new()
        };

        let mask = self.event_mask();
        for flag in changed.iter() {
            self.raw.set(flag, add);
            if !mask.contains(flag) {
                continue;
            }
            self.available.set(flag, add);

            for monitor in self.monitors.iter_mut() {
                monitor(flag, add);
            }
            self.update_effects(flag, add, tick);
        }

        let mut report = TransitionReport::default();
        if add {
            report.added = changed;
        } else {
            report.removed = changed;
        }
        report
    }

    fn update_effects(&mut self, flag: Trigger, add: bool, tick: u64) {
        for effect in self
            .effects_mut()
            .iter_mut()
            .filter(|effect| effect.trigger() == flag)
        {
            if !add {
                effect.expire();
                continue;
            }
            if effect.start(tick) == Activation::Restarted {
                trace!("Restarting {:?} effect", flag);
            }
        }
    }

    /// Switches to another mode slot.
    ///
    /// Effects of the old mode are left to expire. Effects of the new mode whose
    /// trigger is already set start, or restart if they were still expiring.
    ///
    /// # Returns
    /// `true` if the mode changed.
    pub fn switch_mode(&mut self, slot: usize, tick: u64) -> bool {
        if slot == self.current {
            return false;
        }
        if slot >= self.modes.len() {
            warn!(
                "Mode slot {} out of range ({} slots), staying in slot {}",
                slot,
                self.modes.len(),
                self.current
            );
            return false;
        }

        for effect in self.effects_mut() {
            effect.expire();
        }

        self.current = slot;
        self.available = self.raw & self.event_mask();

        let available = self.available;
        for effect in self.effects_mut() {
            if available.contains(effect.trigger()) {
                effect.start(tick);
            }
        }
        true
    }
}

impl fmt::Debug for TriggerStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerStateMachine")
            .field("raw", &self.raw)
            .field("available", &self.available)
            .field("current", &self.current)
            .field("modes", &self.modes)
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::simulation_state::triggers::EffectResources;

    fn effect(trigger: Trigger) -> Effect {
        Effect::new(
            trigger,
            EffectResources {
                sound: Some(format!("{}Sound", trigger.name())),
                ..EffectResources::default()
            },
        )
    }

    fn machine() -> TriggerStateMachine {
        let drill_mask: TriggerSet = [Trigger::Functional, Trigger::Hit, Trigger::RayHit]
            .into_iter()
            .collect::<TriggerSet>()
            | TriggerSet::firing();
        let weld_mask: TriggerSet = [Trigger::Activated, Trigger::Hit].into_iter().collect();

        let mut machine =
            TriggerStateMachine::new(vec![ModeTriggers::new(drill_mask), ModeTriggers::new(weld_mask)]);
        machine.set_effects(0, vec![effect(Trigger::Activated), effect(Trigger::Hit)]);
        machine.set_effects(1, vec![effect(Trigger::Activated), effect(Trigger::Hit)]);
        machine
    }

    fn flags(machine: &TriggerStateMachine) -> Vec<(bool, bool)> {
        machine
            .effects()
            .iter()
            .map(|effect| (effect.is_active(), effect.is_expired()))
            .collect()
    }

    #[test]
    fn removing_an_unset_trigger_is_a_noop() {
        let mut machine = machine();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        machine.add_monitor(Box::new(move |trigger, add| {
            seen.lock().unwrap().push((trigger, add));
        }));

        machine.update(Trigger::Functional.into(), true, false, 1);
        let before = flags(&machine);
        let report = machine.update(Trigger::Hit.into(), false, false, 2);

        assert!(report.is_noop());
        assert_eq!(flags(&machine), before);
        assert_eq!(*calls.lock().unwrap(), vec![(Trigger::Functional, true)]);
    }

    #[test]
    fn removal_cascades_to_higher_priorities() {
        let mut machine = machine();
        machine.update(Trigger::Activated.into(), true, false, 1);
        machine.update(Trigger::Hit.into(), true, true, 1);
        machine.update(Trigger::Functional.into(), true, true, 1);

        let report = machine.update(Trigger::Activated.into(), false, false, 2);
        assert_eq!(
            report.removed.iter().collect::<Vec<_>>(),
            vec![Trigger::Activated, Trigger::Hit]
        );
        assert!(machine.contains(Trigger::Functional));
        assert_eq!(flags(&machine), vec![(true, true), (true, true)]);
    }

    #[test]
    fn keep_firing_suppresses_the_removal() {
        let mut machine = machine();
        machine.update(TriggerSet::firing(), true, true, 1);

        let report = machine.update(TriggerSet::firing(), false, true, 2);
        assert!(report.suppressed);
        assert!(machine.raw().intersects(TriggerSet::firing()));
        assert_eq!(machine.raw() & TriggerSet::firing(), TriggerSet::firing());
    }

    #[test]
    fn unlisted_triggers_stay_out_of_available() {
        let mut machine = machine();
        machine.switch_mode(1, 0);
        machine.update(Trigger::RayHit.into(), true, false, 1);

        assert!(machine.contains(Trigger::RayHit));
        assert!(!machine.available().contains(Trigger::RayHit));
        assert_eq!(machine.winning(), None);
    }

    #[test]
    fn mode_round_trip_restores_effect_flags() {
        let mut machine = machine();
        machine.update(Trigger::Activated.into(), true, false, 1);
        let before = flags(&machine);

        assert!(machine.switch_mode(1, 2));
        assert_eq!(flags(&machine), vec![(true, false), (false, false)]);
        assert!(machine.switch_mode(0, 3));

        assert_eq!(flags(&machine), before);
        assert!(machine.effects()[0].needs_restart());
        assert!(!machine.switch_mode(0, 4));
        assert!(!machine.switch_mode(7, 4));
    }
}
