//! Trigger flags and the priority-ordered set that holds them.

use std::{fmt, ops};

use bitvec::prelude::{BitArray, Lsb0};
use num_derive::FromPrimitive;
use phf::phf_map;

/// Every trigger, lowest priority first.
///
/// The declaration order is the priority order: when several triggers are set,
/// the one declared last wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
#[repr(u8)]
pub enum Trigger {
    Functional = 0,
    Powered = 1,
    Enabled = 2,
    Activated = 3,
    LeftClick = 4,
    RightClick = 5,
    Hit = 6,
    RayHit = 7,
}

impl Trigger {
    pub const ALL: [Trigger; 8] = [
        Trigger::Functional,
        Trigger::Powered,
        Trigger::Enabled,
        Trigger::Activated,
        Trigger::LeftClick,
        Trigger::RightClick,
        Trigger::Hit,
        Trigger::RayHit,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Trigger> {
        num_traits::FromPrimitive::from_usize(index)
    }

    /// The trigger's single bit.
    pub fn flag(self) -> u8 {
        1 << self.index()
    }

    pub fn name(self) -> &'static str {
        match self {
            Trigger::Functional => "Functional",
            Trigger::Powered => "Powered",
            Trigger::Enabled => "Enabled",
            Trigger::Activated => "Activated",
            Trigger::LeftClick => "LeftClick",
            Trigger::RightClick => "RightClick",
            Trigger::Hit => "Hit",
            Trigger::RayHit => "RayHit",
        }
    }
}

/// Trigger names accepted in definitions, including the composites.
pub static TRIGGER_NAMES: phf::Map<&'static str, u8> = phf_map! {
    "Functional" => 1,
    "Powered" => 2,
    "Enabled" => 4,
    "Activated" => 8,
    "LeftClick" => 16,
    "RightClick" => 32,
    "Hit" => 64,
    "RayHit" => 128,
    "Click" => 48,
    "Firing" => 56,
};

/// A set of triggers, iterated in priority order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TriggerSet {
    bits: BitArray<[u8; 1], Lsb0>,
}

impl TriggerSet {
    pub fn new() -> Self {
        TriggerSet::default()
    }

    pub fn from_bits(bits: u8) -> Self {
        TriggerSet {
            bits: BitArray::new([bits]),
        }
    }

    /// Resolves a definition name, composites included.
    pub fn from_name(name: &str) -> Option<Self> {
        TRIGGER_NAMES.get(name).map(|bits| TriggerSet::from_bits(*bits))
    }

    pub fn single(trigger: Trigger) -> Self {
        TriggerSet::from_bits(trigger.flag())
    }

    /// LeftClick and RightClick.
    pub fn click() -> Self {
        TriggerSet::single(Trigger::LeftClick) | TriggerSet::single(Trigger::RightClick)
    }

    /// Activated plus both clicks.
    pub fn firing() -> Self {
        TriggerSet::single(Trigger::Activated) | TriggerSet::click()
    }

    pub fn all() -> Self {
        TriggerSet::from_bits(u8::MAX)
    }

    pub fn bits(&self) -> u8 {
        self.bits.into_inner()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.bits() == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn contains(&self, trigger: Trigger) -> bool {
        self.bits[trigger.index()]
    }

    /// Adds `trigger`, returning `true` if it wasn't already set.
    pub fn insert(&mut self, trigger: Trigger) -> bool {
        let was_set = self.contains(trigger);
        self.bits.set(trigger.index(), true);
        !was_set
    }

    /// Removes `trigger`, returning `true` if it was set.
    pub fn remove(&mut self, trigger: Trigger) -> bool {
        let was_set = self.contains(trigger);
        self.bits.set(trigger.index(), false);
        was_set
    }

    pub fn set(&mut self, trigger: Trigger, value: bool) {
        self.bits.set(trigger.index(), value);
    }

    pub fn intersects(&self, other: TriggerSet) -> bool {
        !(*self & other).is_empty()
    }

    /// Triggers in priority order, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = Trigger> + '_ {
        self.bits.iter_ones().filter_map(Trigger::from_index)
    }

    /// Lowest-priority trigger in the set.
    pub fn lowest(&self) -> Option<Trigger> {
        self.iter().next()
    }

    /// Highest-priority trigger in the set, the one that wins.
    pub fn winning(&self) -> Option<Trigger> {
        self.iter().last()
    }

    /// Every trigger whose priority is at least `trigger`'s.
    pub fn at_or_above(trigger: Trigger) -> Self {
        TriggerSet::from_bits(u8::MAX << trigger.index())
    }
}

impl From<Trigger> for TriggerSet {
    fn from(trigger: Trigger) -> Self {
        TriggerSet::single(trigger)
    }
}

impl FromIterator<Trigger> for TriggerSet {
    fn from_iter<I: IntoIterator<Item = Trigger>>(iter: I) -> Self {
        let mut set = TriggerSet::new();
        for trigger in iter {
            set.insert(trigger);
        }
        set
    }
}

impl ops::BitOr for TriggerSet {
    type Output = TriggerSet;

    fn bitor(self, rhs: TriggerSet) -> TriggerSet {
        TriggerSet::from_bits(self.bits() | rhs.bits())
    }
}

impl ops::BitOrAssign for TriggerSet {
    fn bitor_assign(&mut self, rhs: TriggerSet) {
        *self = *self | rhs;
    }
}

impl ops::BitAnd for TriggerSet {
    type Output = TriggerSet;

    fn bitand(self, rhs: TriggerSet) -> TriggerSet {
        TriggerSet::from_bits(self.bits() & rhs.bits())
    }
}

impl ops::Sub for TriggerSet {
    type Output = TriggerSet;

    fn sub(self, rhs: TriggerSet) -> TriggerSet {
        TriggerSet::from_bits(self.bits() & !rhs.bits())
    }
}

impl fmt::Debug for TriggerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Trigger::name)).finish()
    }
}

/// True when a REMOVE should be ignored because the tool is still firing.
///
/// Removing anything in the Firing family while the tool is activated or
/// shooting would flap the firing effects off between work ticks.
pub fn keeps_firing(add: bool, requested: TriggerSet, activated_or_shooting: bool) -> bool {
    !add && activated_or_shooting && requested.intersects(TriggerSet::firing())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_names_expand_to_their_members() {
        let firing = TriggerSet::from_name("Firing").unwrap();
        assert_eq!(firing, TriggerSet::firing());
        assert_eq!(
            firing.iter().collect::<Vec<_>>(),
            vec![Trigger::Activated, Trigger::LeftClick, Trigger::RightClick]
        );
        assert_eq!(TriggerSet::from_name("Click").unwrap().bits(), 48);
        assert!(TriggerSet::from_name("Sparkle").is_none());
    }

    #[test]
    fn later_triggers_win() {
        let set: TriggerSet = [Trigger::Hit, Trigger::Powered, Trigger::Activated]
            .into_iter()
            .collect();
        assert_eq!(set.winning(), Some(Trigger::Hit));
        assert_eq!(set.lowest(), Some(Trigger::Powered));
        assert_eq!(TriggerSet::new().winning(), None);
    }

    #[test]
    fn at_or_above_covers_the_tail_of_the_order() {
        let tail = TriggerSet::at_or_above(Trigger::LeftClick);
        assert_eq!(
            tail.iter().collect::<Vec<_>>(),
            vec![
                Trigger::LeftClick,
                Trigger::RightClick,
                Trigger::Hit,
                Trigger::RayHit
            ]
        );
        assert_eq!(TriggerSet::at_or_above(Trigger::Functional), TriggerSet::all());
    }

    #[test]
    fn keep_firing_only_guards_removals() {
        let firing = TriggerSet::firing();
        assert!(keeps_firing(false, firing, true));
        assert!(!keeps_firing(true, firing, true));
        assert!(!keeps_firing(false, firing, false));
        assert!(!keeps_firing(false, Trigger::Hit.into(), true));
    }
}
