//! Events, machine identities and reaction keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::KernelError;

/// Event kind used to command (and announce) termination.
pub const HALT: &str = "halt";

/// Suffix appended to an event kind to form its acknowledgement.
pub const ACK_SUFFIX: &str = "ack";

/// Identity of a running machine.
///
/// Allocated from 1 upwards and never reused. [`MachineId::NONE`] doubles as
/// "every machine" in a destination, "any sender" in a [`ReactionKey`] and
/// "no parent" in a context id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MachineId(pub u64);

impl MachineId {
    pub const NONE: MachineId = MachineId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A routed message between machines.
///
/// Events are facts: immutable once built, cloned for broadcast fan-out and
/// consumed by exactly the intended recipient(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub source: MachineId,
    pub destination: MachineId,
    pub kind: String,
    pub ack_requested: bool,
}

impl Event {
    pub fn new(source: MachineId, destination: MachineId, kind: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            kind: kind.into(),
            ack_requested: false,
        }
    }

    /// An event delivered to every live machine.
    pub fn broadcast(source: MachineId, kind: impl Into<String>) -> Self {
        Self::new(source, MachineId::NONE, kind)
    }

    /// Ask the recipient to acknowledge before it reacts.
    pub fn with_ack(mut self) -> Self {
        self.ack_requested = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }

    /// The exact-sender key this event is looked up under.
    pub fn reaction_key(&self) -> ReactionKey {
        ReactionKey::new(self.source, self.kind.clone())
    }

    /// The acknowledgement `responder` sends back to this event's source.
    pub fn ack(&self, responder: MachineId) -> Event {
        Event::new(responder, self.source, ack_kind(&self.kind))
    }
}

/// Kind of the acknowledgement for events of `kind`.
pub fn ack_kind(kind: &str) -> String {
    format!("{kind}{ACK_SUFFIX}")
}

/// Lookup key into a reaction table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionKey {
    pub source: MachineId,
    pub kind: String,
}

impl ReactionKey {
    pub fn new(source: MachineId, kind: impl Into<String>) -> Self {
        Self {
            source,
            kind: kind.into(),
        }
    }

    /// Matches `kind` from any sender.
    pub fn any(kind: impl Into<String>) -> Self {
        Self::new(MachineId::NONE, kind)
    }
}

/// A request to launch a new machine, answered with its freshly allocated id.
#[derive(Debug)]
pub struct SpawnRequest {
    pub policy: String,
    pub requester: MachineId,
    pub reply: oneshot::Sender<Result<MachineId, KernelError>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_swaps_direction_and_suffixes_kind() {
        let event = Event::new(MachineId(4), MachineId(1), "cycle").with_ack();
        let ack = event.ack(MachineId(1));

        assert_eq!(ack.source, MachineId(1));
        assert_eq!(ack.destination, MachineId(4));
        assert_eq!(ack.kind, "cycleack");
        assert!(!ack.ack_requested);
    }

    #[test]
    fn broadcast_targets_no_one_in_particular() {
        let event = Event::broadcast(MachineId(2), HALT);
        assert!(event.is_broadcast());
        assert!(!Event::new(MachineId(2), MachineId(3), HALT).is_broadcast());
    }

    #[test]
    fn machine_id_serializes_as_plain_integer() {
        let event = Event::new(MachineId(3), MachineId(1), "read");
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["source"], 3);
        assert_eq!(json["destination"], 1);
        assert_eq!(json["kind"], "read");
    }
}
