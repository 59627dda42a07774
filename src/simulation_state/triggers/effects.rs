//! # Effects
//!
//! An effect is one audiovisual element (animation, particles, beam, sound)
//! bound to a trigger in one tool mode. The state machine only flips flags;
//! whoever renders the effect reads them and reports back.
//!
//! ## Lifecycle
//!
//! ```text
//! Inactive --add--> Active --remove--> Expired --add--> Active + Restart
//!                                         |
//!                                       reap (by the consumer) --> Inactive
//! ```

use super::Trigger;

/// Resource names an effect drives. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectResources {
    pub animation: Option<String>,
    pub particle: Option<String>,
    pub beam: Option<String>,
    pub sound: Option<String>,
}

/// What a call to `Effect::start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Started,
    Restarted,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    trigger: Trigger,
    resources: EffectResources,
    active: bool,
    expired: bool,
    restart: bool,
    sound_stopped: bool,
    last_active_tick: u64,
}

impl Effect {
    pub fn new(trigger: Trigger, resources: EffectResources) -> Self {
        Effect {
            trigger,
            resources,
            active: false,
            expired: false,
            restart: false,
            sound_stopped: false,
            last_active_tick: 0,
        }
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn resources(&self) -> &EffectResources {
        &self.resources
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn needs_restart(&self) -> bool {
        self.restart
    }

    pub fn sound_stopped(&self) -> bool {
        self.sound_stopped
    }

    /// Tick at which the effect was last started or restarted.
    pub fn last_active_tick(&self) -> u64 {
        self.last_active_tick
    }

    pub fn has_animation(&self) -> bool {
        self.resources.animation.is_some()
    }

    pub fn has_particle(&self) -> bool {
        self.resources.particle.is_some()
    }

    pub fn has_beam(&self) -> bool {
        self.resources.beam.is_some()
    }

    pub fn has_sound(&self) -> bool {
        self.resources.sound.is_some()
    }

    /// Starts the effect, or flags an expiring one for restart.
    pub(crate) fn start(&mut self, tick: u64) -> Activation {
        if !self.active {
            self.active = true;
            self.expired = false;
            self.last_active_tick = tick;
            Activation::Started
        } else if self.expired {
            self.expired = false;
            self.sound_stopped = false;
            self.restart = true;
            self.last_active_tick = tick;
            Activation::Restarted
        } else {
            Activation::AlreadyRunning
        }
    }

    /// Lets a running effect fade out. Inactive effects stay untouched.
    pub(crate) fn expire(&mut self) {
        self.expired = self.active;
    }

    /// Called by the consumer once an expired effect has finished playing.
    pub fn reap(&mut self) {
        self.active = false;
        self.expired = false;
        self.restart = false;
        self.sound_stopped = false;
    }

    /// Called by the consumer after it has restarted the effect.
    pub fn acknowledge_restart(&mut self) {
        self.restart = false;
    }

    pub fn mark_sound_stopped(&mut self) {
        self.sound_stopped = true;
    }
}
