//! The controller: registry, router, spawner and quiescence detector.
//!
//! All process-wide state (the live set, the id counter, the distribution
//! conduits) is owned by the controller's scheduling loop and touched by
//! nothing else. Each iteration handles exactly one of:
//!
//! 1. **route**: an event from the controller's own mailbox, broadcast or
//!    unicast to the live machines
//! 2. **spawn**: a request to launch a machine running a registered policy
//! 3. **halt notification**: a machine reporting that it has halted
//!
//! The loop ends when a halt notification leaves the live set empty.

use std::collections::BTreeMap;
use std::future;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::barrier::CompletionBarrier;
use crate::conduit::{self, handoff, HaltTx, HandoffRx, HandoffTx};
use crate::error::KernelError;
use crate::event::{Event, MachineId, SpawnRequest, HALT};
use crate::machine::MachineSpec;
use crate::mailbox::Mailbox;
use crate::registry::Registry;
use crate::relay::Relay;

/// What the controller did before reaching quiescence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelReport {
    /// Machines launched, the root included.
    pub launched: u64,
    pub unicasts: u64,
    pub broadcasts: u64,
    /// Individual hand-offs into machine distribution conduits.
    pub deliveries: u64,
    /// Routed events by kind.
    pub routed: BTreeMap<String, u64>,
    /// Machine ids in the order their halts were reported.
    pub halted: Vec<MachineId>,
}

/// Hands out machine ids: 1, 2, 3, ... never reused.
#[derive(Debug)]
struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn allocate(&mut self) -> MachineId {
        let id = MachineId(self.next);
        self.next += 1;
        id
    }
}

pub struct Controller {
    registry: Registry,
    ids: IdAllocator,
    /// Live machines and their distribution conduits.
    live: BTreeMap<MachineId, HandoffTx<Event>>,
    barrier: CompletionBarrier,

    enqueue: HandoffTx<Event>,
    dequeue: HandoffRx<Event>,
    own_halts: Vec<HaltTx>,

    outbound: HandoffTx<Event>,
    spawner: HandoffTx<SpawnRequest>,
    spawn_requests: HandoffRx<SpawnRequest>,
    halt_report: HandoffTx<MachineId>,
    halt_reports: HandoffRx<MachineId>,

    report: KernelReport,
}

impl Controller {
    /// Create a controller and start its own mailbox and relay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(registry: Registry) -> Self {
        let mut barrier = CompletionBarrier::new("controller");

        let (outbound, shared_out) = handoff();
        let (mailbox, handles) = Mailbox::new("controller");
        let (relay, relay_halt) = Relay::new("controller", shared_out, handles.enqueue.clone());
        barrier.spawn(mailbox.run());
        barrier.spawn(relay.run());

        let (spawner, spawn_requests) = handoff();
        let (halt_report, halt_reports) = handoff();

        Self {
            registry,
            ids: IdAllocator::new(),
            live: BTreeMap::new(),
            barrier,
            enqueue: handles.enqueue,
            dequeue: handles.dequeue,
            own_halts: vec![handles.halt, relay_halt],
            outbound,
            spawner,
            spawn_requests,
            halt_report,
            halt_reports,
            report: KernelReport::default(),
        }
    }

    /// Launch a machine running `policy` under `context_id`.
    ///
    /// The new id is marked live before the machine starts, so events
    /// addressed to it are never dropped.
    pub fn launch(
        &mut self,
        policy: &str,
        context_id: MachineId,
    ) -> Result<MachineId, KernelError> {
        let launcher = self.registry.launcher(policy)?;
        let id = self.ids.allocate();

        let (distribution, inbound) = handoff();
        self.live.insert(id, distribution);

        let spec = MachineSpec {
            id,
            context_id,
            policy: policy.to_owned(),
            outbound: self.outbound.clone(),
            inbound,
            spawner: self.spawner.clone(),
            halt_report: self.halt_report.clone(),
        };
        self.barrier.spawn(launcher(spec));
        self.report.launched += 1;

        info!(machine = %id, policy, context = %context_id, "machine launched");
        Ok(id)
    }

    pub fn live(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.live.keys().copied()
    }

    /// Run the scheduling loop until quiescence, then wait for every
    /// process the controller launched.
    pub async fn run(mut self) -> Result<KernelReport, KernelError> {
        if self.live.is_empty() {
            self.stop_own_processes();
        } else {
            while !self.turn().await? {}
        }

        let Controller {
            barrier, report, ..
        } = self;
        if !barrier.is_empty() {
            debug!(pending = barrier.len(), "waiting for launched processes");
        }
        barrier.wait().await?;
        Ok(report)
    }

    /// One scheduling iteration. Returns `true` once nothing is live.
    async fn turn(&mut self) -> Result<bool, KernelError> {
        let stopped = tokio::select! {
            Some(event) = self.dequeue.recv() => {
                self.route(event).await;
                false
            }
            Some(request) = self.spawn_requests.recv() => {
                self.spawn(request);
                false
            }
            Some(id) = self.halt_reports.recv() => self.retire(id).await?,
            else => return Err(KernelError::closed("controller")),
        };

        // finished machines leave the barrier as they go
        self.barrier.reap();
        Ok(stopped)
    }

    async fn route(&mut self, event: Event) {
        *self.report.routed.entry(event.kind.clone()).or_default() += 1;

        if event.is_broadcast() {
            self.broadcast(event).await;
        } else {
            self.unicast(event).await;
        }
    }

    /// Hand a copy to every live machine and wait until each one has taken it.
    async fn broadcast(&mut self, event: Event) {
        let mut fanout =
            CompletionBarrier::new(format!("broadcast {} from {}", event.kind, event.source));
        for distribution in self.live.values() {
            let distribution = distribution.clone();
            let event = event.clone();
            fanout.spawn(async move {
                distribution
                    .send(event)
                    .await
                    .map_err(|_| KernelError::closed("distribution"))
            });
        }

        let targets = fanout.len() as u64;
        trace!(from = %event.source, kind = %event.kind, targets, "broadcasting");
        if let Err(err) = fanout.wait().await {
            warn!(
                from = %event.source,
                kind = %event.kind,
                error = %err,
                "broadcast incomplete"
            );
        }

        self.report.broadcasts += 1;
        self.report.deliveries += targets;
    }

    async fn unicast(&mut self, event: Event) {
        let Some(distribution) = self.live.get(&event.destination) else {
            warn!(
                from = %event.source,
                to = %event.destination,
                kind = %event.kind,
                "destination not live, routing blocked"
            );
            // ids are never reused, so no receiver will ever appear
            future::pending::<()>().await;
            return;
        };

        trace!(
            from = %event.source,
            to = %event.destination,
            kind = %event.kind,
            "routing"
        );
        let destination = event.destination;
        if distribution.send(event).await.is_err() {
            warn!(to = %destination, "distribution conduit closed");
            return;
        }
        self.report.unicasts += 1;
        self.report.deliveries += 1;
    }

    fn spawn(&mut self, request: SpawnRequest) {
        let SpawnRequest {
            policy,
            requester,
            reply,
        } = request;

        let outcome = self.launch(&policy, requester);
        if let Err(err) = &outcome {
            warn!(policy = %policy, requester = %requester, error = %err, "spawn rejected");
        }
        if reply.send(outcome).is_err() {
            warn!(requester = %requester, "requester gone before spawn reply");
        }
    }

    /// Handle a halt notification. Returns `true` once nothing is live.
    async fn retire(&mut self, id: MachineId) -> Result<bool, KernelError> {
        info!(machine = %id, "machine halting");

        // listeners reacting to this machine's halt hear it through routing
        self.enqueue
            .send(Event::broadcast(id, HALT))
            .await
            .map_err(|_| KernelError::closed("controller mailbox"))?;
        self.live.remove(&id);
        self.report.halted.push(id);

        if !self.live.is_empty() {
            return Ok(false);
        }

        info!(
            halted = self.report.halted.len(),
            "no machines live, controller stopping"
        );
        self.stop_own_processes();
        Ok(true)
    }

    fn stop_own_processes(&mut self) {
        for signal in self.own_halts.drain(..) {
            conduit::halt(signal);
        }
    }
}
