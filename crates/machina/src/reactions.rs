//! Per-machine reaction tables.

use std::collections::HashMap;

use crate::event::{Event, ReactionKey};
use crate::policy::Step;

/// Maps `(expected sender, event kind)` to the step taken when it arrives.
///
/// Owned by exactly one engine and mutated by that machine's handlers as its
/// logic progresses.
#[derive(Debug, Clone)]
pub struct ReactionTable<S> {
    entries: HashMap<ReactionKey, Step<S>>,
}

impl<S> Default for ReactionTable<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S: Clone> ReactionTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the reaction for `key`.
    pub fn install(&mut self, key: ReactionKey, step: Step<S>) -> Option<Step<S>> {
        self.entries.insert(key, step)
    }

    pub fn remove(&mut self, key: &ReactionKey) -> Option<Step<S>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &ReactionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The step `event` triggers: the exact sender entry first, then the
    /// wildcard entry for its kind.
    pub fn lookup(&self, event: &Event) -> Option<Step<S>> {
        self.entries
            .get(&event.reaction_key())
            .or_else(|| self.entries.get(&ReactionKey::any(event.kind.as_str())))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MachineId;

    #[derive(Debug, Clone, PartialEq)]
    enum S {
        One,
        Two,
    }

    #[test]
    fn wildcard_matches_unknown_sender() {
        let mut table = ReactionTable::new();
        table.install(ReactionKey::any("x"), Step::Enter(S::One));

        let event = Event::new(MachineId(7), MachineId(1), "x");
        assert_eq!(table.lookup(&event), Some(Step::Enter(S::One)));
    }

    #[test]
    fn exact_sender_wins_over_wildcard() {
        let mut table = ReactionTable::new();
        table.install(ReactionKey::any("x"), Step::Enter(S::One));
        table.install(ReactionKey::new(MachineId(7), "x"), Step::Enter(S::Two));

        assert_eq!(
            table.lookup(&Event::new(MachineId(7), MachineId(1), "x")),
            Some(Step::Enter(S::Two))
        );
        assert_eq!(
            table.lookup(&Event::new(MachineId(8), MachineId(1), "x")),
            Some(Step::Enter(S::One))
        );
    }

    #[test]
    fn unmatched_kind_finds_nothing() {
        let mut table: ReactionTable<S> = ReactionTable::new();
        table.install(ReactionKey::new(MachineId(2), "read"), Step::Halt);

        let stranger = Event::new(MachineId(3), MachineId(1), "read");
        let other_kind = Event::new(MachineId(2), MachineId(1), "write");
        assert_eq!(table.lookup(&stranger), None);
        assert_eq!(table.lookup(&other_kind), None);
    }

    #[test]
    fn removal_falls_back_to_wildcard() {
        let mut table = ReactionTable::new();
        let exact = ReactionKey::new(MachineId(4), "seek");
        table.install(exact.clone(), Step::Enter(S::Two));
        table.install(ReactionKey::any("seek"), Step::Listen);

        assert_eq!(table.remove(&exact), Some(Step::Enter(S::Two)));
        assert!(!table.contains(&exact));
        assert_eq!(
            table.lookup(&Event::new(MachineId(4), MachineId(1), "seek")),
            Some(Step::Listen)
        );
        assert_eq!(table.len(), 1);
    }
}
