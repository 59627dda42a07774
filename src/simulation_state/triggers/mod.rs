//! # Triggers
//!
//! Tool state that drives audiovisual feedback.
//!
//! ## Key Components
//! - `Trigger` / `TriggerSet`: The eight trigger flags in priority order
//! - `keeps_firing`: Guard that stops firing effects flapping between work ticks
//! - `TriggerStateMachine`: Raw and available sets, monitors and mode switches
//! - `Effect`: Active/Expired/Restart flags read by the effect consumer

pub mod effects;
pub mod state_machine;
pub mod trigger;

pub use effects::{Activation, Effect, EffectResources};
pub use state_machine::{Monitor, ModeTriggers, TransitionReport, TriggerStateMachine};
pub use trigger::{keeps_firing, Trigger, TriggerSet, TRIGGER_NAMES};
