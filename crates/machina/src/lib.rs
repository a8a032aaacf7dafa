//! # Machina
//!
//! An actor-style kernel: independently scheduled machines that talk only
//! through events routed by a central controller.
//!
//! ## Core Concepts
//!
//! - [`Event`] = a routed fact `{source, destination, kind, ack_requested}`;
//!   destination `0` means every live machine
//! - [`Policy`] = the behaviour a machine runs: its own states and what they do
//! - [`Controller`] = owns the live set, routes events, launches machines and
//!   notices when nothing is left running
//!
//! ## Architecture
//!
//! ```text
//!  Machine 3                                     Controller
//!  ┌────────────────────────────────────┐        ┌──────────────────────────┐
//!  │ Engine ─► Mailbox(out) ─► Relay ───┼───────►│ Relay ─► Mailbox         │
//!  │   ▲                               │        │             │            │
//!  │   └─ Mailbox(in) ◄── Relay ◄──────┼──┐     │             ▼            │
//!  └────────────────────────────────────┘  │     │   scheduling loop        │
//!                                          │     │   ├─ route ─────────────┼──┐
//!  Machine 4 ... (same shape)              │     │   ├─ spawn              │  │
//!                                          │     │   └─ halt notification  │  │
//!                                          │     └──────────────────────────┘  │
//!                                          └───────── distribution ◄───────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Confined state** - the live set and id counter belong to the
//!    controller loop, each reaction table to its engine; there are no locks
//! 2. **FIFO mailboxes** - per mailbox, dequeue order is enqueue order
//! 3. **Broadcast is a barrier** - the controller resumes only after every
//!    live machine accepted the broadcast
//! 4. **Ids are never reused** - allocated 1, 2, 3, ... for the process lifetime
//! 5. **Quiescence ends everything** - the controller stops when the last live
//!    machine reports halt, and waits for every process it launched
//! 6. **Rendezvous conduits** - a send completes only once the receiver has
//!    taken the item; mailboxes are the only buffers
//!
//! ## Shutdown
//!
//! A machine halts when its reaction table sends it to `Halt`. Every machine
//! spawned by another reacts to its parent's `halt` announcement, so halting
//! the root cascades through the whole tree.
//!
//! ## Example
//!
//! ```ignore
//! use machina_core::{async_trait, Context, Kernel, Policy, Step};
//!
//! #[derive(Debug, Clone)]
//! enum Root {}
//!
//! struct Boot;
//!
//! #[async_trait]
//! impl Policy for Boot {
//!     type State = Root;
//!
//!     async fn setup(&mut self, cx: &mut Context<Root>) -> anyhow::Result<Step<Root>> {
//!         let worker = cx.spawn("worker").await?;
//!         cx.emit(worker, "start").await?;
//!         Ok(Step::Halt)
//!     }
//!
//!     async fn on_state(
//!         &mut self,
//!         state: Root,
//!         _: &mut Context<Root>,
//!     ) -> anyhow::Result<Step<Root>> {
//!         match state {}
//!     }
//! }
//!
//! let report = Kernel::builder()
//!     .with_policy("boot", || Boot)
//!     .with_policy("worker", Worker::default)
//!     .build()
//!     .run("boot")
//!     .await?;
//! ```

mod barrier;
mod conduit;
mod controller;
mod engine;
mod error;
mod event;
mod kernel;
mod machine;
mod mailbox;
mod policy;
mod reactions;
mod registry;
mod relay;

// Re-export the data model
pub use crate::event::{ack_kind, Event, MachineId, ReactionKey, SpawnRequest, ACK_SUFFIX, HALT};

// Re-export error types
pub use crate::error::KernelError;

// Re-export policy authoring types
pub use crate::policy::{Context, Policy, Step};
pub use crate::reactions::ReactionTable;

// Re-export kernel building blocks
pub use crate::barrier::CompletionBarrier;
pub use crate::conduit::{
    halt, halt_signal, handoff, Closed, HaltRx, HaltTx, HandoffRx, HandoffTx, Offer,
};
pub use crate::engine::{Engine, EngineIo};
pub use crate::machine::{Machine, MachineSpec};
pub use crate::mailbox::{Mailbox, MailboxHandles};
pub use crate::relay::Relay;

// Re-export controller and bootstrap types
pub use crate::controller::{Controller, KernelReport};
pub use crate::kernel::{Kernel, KernelBuilder};
pub use crate::registry::{Launcher, Registry};

// Re-export commonly used external types
pub use async_trait::async_trait;
