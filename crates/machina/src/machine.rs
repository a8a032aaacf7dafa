//! A machine: one engine wired between two mailboxes and two relays.
//!
//! ```text
//!  inbound ─► Relay ─► Mailbox(in) ─► Engine ─► Mailbox(out) ─► Relay ─► outbound
//! ```
//!
//! The machine owns a completion barrier over its four internal processes
//! and does not finish until every one of them has exited.

use tracing::debug;

use crate::barrier::CompletionBarrier;
use crate::conduit::{HandoffRx, HandoffTx};
use crate::engine::{Engine, EngineIo};
use crate::error::KernelError;
use crate::event::{Event, MachineId, SpawnRequest};
use crate::mailbox::Mailbox;
use crate::policy::Policy;
use crate::relay::Relay;

/// Identity and external conduits of a machine about to launch.
#[derive(Debug)]
pub struct MachineSpec {
    pub id: MachineId,
    pub context_id: MachineId,
    /// Registered name of the policy the machine runs.
    pub policy: String,
    /// Shared conduit into the controller.
    pub outbound: HandoffTx<Event>,
    /// This machine's distribution conduit from the controller.
    pub inbound: HandoffRx<Event>,
    pub spawner: HandoffTx<SpawnRequest>,
    pub halt_report: HandoffTx<MachineId>,
}

pub struct Machine<P: Policy> {
    policy: P,
    spec: MachineSpec,
}

impl<P: Policy> Machine<P> {
    pub fn new(policy: P, spec: MachineSpec) -> Self {
        Self { policy, spec }
    }

    pub async fn run(self) -> Result<(), KernelError> {
        let Machine { policy, spec } = self;
        let id = spec.id;
        let mut barrier = CompletionBarrier::new(format!("machine {id}"));

        let (inbox, inbox_handles) = Mailbox::new(format!("{id}/in"));
        let (outbox, outbox_handles) = Mailbox::new(format!("{id}/out"));
        let (relay_in, relay_in_halt) =
            Relay::new(format!("{id}/in"), spec.inbound, inbox_handles.enqueue);
        let (relay_out, relay_out_halt) =
            Relay::new(format!("{id}/out"), outbox_handles.dequeue, spec.outbound);

        barrier.spawn(inbox.run());
        barrier.spawn(outbox.run());
        barrier.spawn(relay_in.run());
        barrier.spawn(relay_out.run());

        let io = EngineIo {
            outbound: outbox_handles.enqueue,
            inbound: inbox_handles.dequeue,
            empty: inbox_handles.empty,
            spawner: spec.spawner,
            halt_report: spec.halt_report,
            internals: vec![
                inbox_handles.halt,
                outbox_handles.halt,
                relay_in_halt,
                relay_out_halt,
            ],
        };
        // nobody waits on the outbound mailbox running dry
        drop(outbox_handles.empty);

        let outcome = Engine::new(id, spec.context_id, policy, io).run().await;

        debug!(machine = %id, pending = barrier.len(), "waiting for internal processes");
        barrier.wait().await?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::handoff;
    use crate::policy::{Context, Step};
    use async_trait::async_trait;

    /// Echoes every "ping" back to its sender as "pong", halts on "stop".
    struct Echo;

    #[derive(Debug, Clone)]
    enum EchoState {
        Pong,
    }

    #[async_trait]
    impl Policy for Echo {
        type State = EchoState;

        async fn setup(
            &mut self,
            cx: &mut Context<EchoState>,
        ) -> anyhow::Result<Step<EchoState>> {
            cx.react_any("ping", Step::Enter(EchoState::Pong));
            cx.react_any("stop", Step::Halt);
            Ok(Step::Listen)
        }

        async fn on_state(
            &mut self,
            state: EchoState,
            cx: &mut Context<EchoState>,
        ) -> anyhow::Result<Step<EchoState>> {
            match state {
                EchoState::Pong => {
                    cx.emit(cx.sender(), "pong").await?;
                    Ok(Step::Listen)
                }
            }
        }
    }

    #[tokio::test]
    async fn routes_through_both_mailboxes_and_joins_on_halt() {
        let (outbound, mut from_machine) = handoff();
        let (to_machine, inbound) = handoff();
        let (spawner, _spawns) = handoff();
        let (halt_report, mut halts) = handoff();

        let spec = MachineSpec {
            id: MachineId(2),
            context_id: MachineId::NONE,
            policy: "echo".into(),
            outbound,
            inbound,
            spawner,
            halt_report,
        };
        let machine = tokio::spawn(Machine::new(Echo, spec).run());

        for _ in 0..3 {
            to_machine
                .send(Event::new(MachineId(9), MachineId(2), "ping"))
                .await
                .unwrap();
            let pong = from_machine.recv().await.unwrap();
            assert_eq!(pong, Event::new(MachineId(2), MachineId(9), "pong"));
        }

        to_machine
            .send(Event::new(MachineId(9), MachineId(2), "stop"))
            .await
            .unwrap();
        assert_eq!(halts.recv().await, Some(MachineId(2)));

        // returns only once all four internal processes are gone
        machine.await.unwrap().unwrap();
        assert!(to_machine.is_closed());
    }
}
