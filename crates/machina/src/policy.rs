//! Policies: the pluggable behaviour a machine runs.
//!
//! A policy only supplies its own states and what happens in them. Listening,
//! reaction lookup, acknowledgements and halting belong to the engine and are
//! the same for every machine.
//!
//! ```ignore
//! #[derive(Debug, Clone)]
//! enum PingState {
//!     Pong,
//! }
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl Policy for Ping {
//!     type State = PingState;
//!
//!     async fn setup(&mut self, cx: &mut Context<PingState>) -> anyhow::Result<Step<PingState>> {
//!         cx.react_any("ping", Step::Enter(PingState::Pong));
//!         Ok(Step::Listen)
//!     }
//!
//!     async fn on_state(
//!         &mut self,
//!         state: PingState,
//!         cx: &mut Context<PingState>,
//!     ) -> anyhow::Result<Step<PingState>> {
//!         match state {
//!             PingState::Pong => {
//!                 let sender = cx.sender();
//!                 cx.emit(sender, "pong").await?;
//!                 Ok(Step::Listen)
//!             }
//!         }
//!     }
//! }
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::conduit::HandoffTx;
use crate::error::KernelError;
use crate::event::{Event, MachineId, ReactionKey, SpawnRequest, HALT};
use crate::reactions::ReactionTable;

/// Where the engine goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<S> {
    /// Wait for the next event.
    Listen,
    /// Run the policy's handler for `S`.
    Enter(S),
    /// Report to the controller and shut the machine down.
    Halt,
}

#[async_trait]
pub trait Policy: Send + 'static {
    /// The policy's own states. The engine treats them opaquely.
    type State: Debug + Clone + Send + Sync + 'static;

    /// One-shot initialization. The returned step is the first state.
    async fn setup(&mut self, _cx: &mut Context<Self::State>) -> anyhow::Result<Step<Self::State>> {
        Ok(Step::Listen)
    }

    /// Run `state` to completion.
    async fn on_state(
        &mut self,
        state: Self::State,
        cx: &mut Context<Self::State>,
    ) -> anyhow::Result<Step<Self::State>>;
}

/// Everything a handler may touch: its identity, the event that triggered
/// it, its reaction table, and the conduits to send and spawn through.
pub struct Context<S> {
    id: MachineId,
    context_id: MachineId,
    current: Option<Event>,
    reactions: ReactionTable<S>,
    outbound: HandoffTx<Event>,
    spawner: HandoffTx<SpawnRequest>,
}

impl<S: Clone> Context<S> {
    pub(crate) fn new(
        id: MachineId,
        context_id: MachineId,
        outbound: HandoffTx<Event>,
        spawner: HandoffTx<SpawnRequest>,
    ) -> Self {
        let mut reactions = ReactionTable::new();
        if !context_id.is_none() {
            reactions.install(ReactionKey::new(context_id, HALT), Step::Halt);
        }

        Self {
            id,
            context_id,
            current: None,
            reactions,
            outbound,
            spawner,
        }
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    /// The machine that spawned this one, [`MachineId::NONE`] for the root.
    pub fn context_id(&self) -> MachineId {
        self.context_id
    }

    /// The event whose reaction led to the current state.
    pub fn event(&self) -> Option<&Event> {
        self.current.as_ref()
    }

    /// Source of the current event, [`MachineId::NONE`] before the first one.
    pub fn sender(&self) -> MachineId {
        self.current
            .as_ref()
            .map_or(MachineId::NONE, |event| event.source)
    }

    pub(crate) fn set_event(&mut self, event: Event) {
        self.current = Some(event);
    }

    pub fn reactions(&self) -> &ReactionTable<S> {
        &self.reactions
    }

    /// React to `kind` from `source`.
    pub fn react(&mut self, source: MachineId, kind: impl Into<String>, step: Step<S>) {
        self.reactions.install(ReactionKey::new(source, kind), step);
    }

    /// React to `kind` from any sender without a more specific entry.
    pub fn react_any(&mut self, kind: impl Into<String>, step: Step<S>) {
        self.reactions.install(ReactionKey::any(kind), step);
    }

    /// Stop reacting to `kind` from `source`.
    pub fn ignore(&mut self, source: MachineId, kind: impl Into<String>) {
        self.reactions.remove(&ReactionKey::new(source, kind));
    }

    pub async fn send(&self, event: Event) -> Result<(), KernelError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| KernelError::closed("outbound"))
    }

    pub async fn emit(
        &self,
        destination: MachineId,
        kind: impl Into<String>,
    ) -> Result<(), KernelError> {
        self.send(Event::new(self.id, destination, kind)).await
    }

    /// Emit an event the recipient must acknowledge with `kind + "ack"`.
    pub async fn emit_with_ack(
        &self,
        destination: MachineId,
        kind: impl Into<String>,
    ) -> Result<(), KernelError> {
        self.send(Event::new(self.id, destination, kind).with_ack())
            .await
    }

    pub async fn broadcast(&self, kind: impl Into<String>) -> Result<(), KernelError> {
        self.send(Event::broadcast(self.id, kind)).await
    }

    /// Launch a machine running `policy` with this machine as its context.
    pub async fn spawn(&self, policy: &str) -> Result<MachineId, KernelError> {
        let (reply, response) = oneshot::channel();
        let request = SpawnRequest {
            policy: policy.to_owned(),
            requester: self.id,
            reply,
        };

        self.spawner
            .send(request)
            .await
            .map_err(|_| KernelError::closed("spawn request"))?;
        response
            .await
            .map_err(|_| KernelError::closed("spawn reply"))?
    }
}
