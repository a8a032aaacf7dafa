//! The reactive engine every machine runs.
//!
//! Two states are universal: `Listen` waits on the inbound mailbox and looks
//! incoming events up in the reaction table, `Halt` reports to the controller
//! and stops the machine's internal processes. Everything else is a policy
//! state, run through [`Policy::on_state`].

use tracing::{debug, error, info, trace, warn};

use crate::conduit::{self, HaltTx, HandoffRx, HandoffTx};
use crate::error::KernelError;
use crate::event::{Event, MachineId, SpawnRequest};
use crate::policy::{Context, Policy, Step};

/// The conduits an engine is wired to.
pub struct EngineIo {
    /// Enqueue side of the machine's outbound mailbox.
    pub outbound: HandoffTx<Event>,
    /// Dequeue side of the machine's inbound mailbox.
    pub inbound: HandoffRx<Event>,
    /// Empty signal of the inbound mailbox.
    pub empty: HandoffRx<()>,
    pub spawner: HandoffTx<SpawnRequest>,
    pub halt_report: HandoffTx<MachineId>,
    /// Halt signals of the machine's mailboxes and relays.
    pub internals: Vec<HaltTx>,
}

pub struct Engine<P: Policy> {
    policy: P,
    cx: Context<P::State>,
    inbound: HandoffRx<Event>,
    empty: HandoffRx<()>,
    empty_open: bool,
    halt_report: HandoffTx<MachineId>,
    internals: Vec<HaltTx>,
}

impl<P: Policy> Engine<P> {
    pub fn new(id: MachineId, context_id: MachineId, policy: P, io: EngineIo) -> Self {
        Self {
            policy,
            cx: Context::new(id, context_id, io.outbound, io.spawner),
            inbound: io.inbound,
            empty: io.empty,
            empty_open: true,
            halt_report: io.halt_report,
            internals: io.internals,
        }
    }

    /// Run until the machine halts.
    ///
    /// A failing handler or a closed inbound mailbox still goes through the
    /// halt protocol, so the controller always hears about this machine; the
    /// failure is returned afterwards.
    pub async fn run(mut self) -> Result<(), KernelError> {
        let id = self.cx.id();
        let mut failure = None;

        let mut step = match self.policy.setup(&mut self.cx).await {
            Ok(step) => step,
            Err(source) => {
                error!(machine = %id, error = %source, "setup failed");
                failure = Some(KernelError::Policy {
                    machine: id,
                    source,
                });
                Step::Halt
            }
        };

        loop {
            step = match step {
                Step::Listen => match self.listen().await {
                    Ok(next) => next,
                    Err(err) => {
                        error!(machine = %id, error = %err, "listen failed");
                        failure = Some(err);
                        Step::Halt
                    }
                },
                Step::Enter(state) => {
                    debug!(machine = %id, state = ?state, "entering state");
                    match self.policy.on_state(state, &mut self.cx).await {
                        Ok(next) => next,
                        Err(source) => {
                            error!(machine = %id, error = %source, "handler failed");
                            failure = Some(KernelError::Policy {
                                machine: id,
                                source,
                            });
                            Step::Halt
                        }
                    }
                }
                Step::Halt => break,
            };
        }

        self.halt().await;
        failure.map_or(Ok(()), Err)
    }

    async fn listen(&mut self) -> Result<Step<P::State>, KernelError> {
        tokio::select! {
            signal = self.empty.recv(), if self.empty_open => {
                if signal.is_none() {
                    self.empty_open = false;
                }
                tokio::task::yield_now().await;
                Ok(Step::Listen)
            }
            event = self.inbound.recv() => match event {
                Some(event) => self.react(event).await,
                None => Err(KernelError::closed("inbound")),
            },
        }
    }

    async fn react(&mut self, event: Event) -> Result<Step<P::State>, KernelError> {
        let id = self.cx.id();

        let Some(next) = self.cx.reactions().lookup(&event) else {
            trace!(
                machine = %id,
                from = %event.source,
                kind = %event.kind,
                "no reaction, dropped"
            );
            return Ok(Step::Listen);
        };

        if event.ack_requested {
            self.cx.send(event.ack(id)).await?;
        }

        debug!(
            machine = %id,
            from = %event.source,
            kind = %event.kind,
            next = ?next,
            "reacting"
        );
        self.cx.set_event(event);
        Ok(next)
    }

    async fn halt(self) {
        let id = self.cx.id();

        if self.halt_report.send(id).await.is_err() {
            warn!(machine = %id, "controller gone before halt report");
        }
        for signal in self.internals {
            conduit::halt(signal);
        }

        info!(machine = %id, "halted");
    }
}
