//! Testing utilities for the machina kernel.
//!
//! Tests describe machines as [`Script`]s: lists of [`Action`]s run at setup
//! and in numbered blocks entered through reactions. Everything a scripted
//! machine does is written to a [`Journal`] the test reads afterwards.
//!
//! ```ignore
//! use machina_testing::{Action, Harness, Script, Target, Then};
//!
//! let outcome = Harness::new()
//!     .script("root", Script::new(vec![Action::spawn("child"), Action::Halt]))
//!     .script("child", Script::new(vec![Action::note("alive")]))
//!     .run("root")
//!     .await?;
//!
//! assert_eq!(outcome.report.launched, 2);
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use machina_core::{Context, Event, Kernel, KernelReport, MachineId, Policy, Registry, Step};
use tokio::sync::mpsc;

/// Upper bound for a harness run before the test is failed as hung.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

// ============================================================================
// Scripts
// ============================================================================

/// A machine a script refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The machine that spawned this one.
    Parent,
    /// Source of the event that led into the running block.
    Sender,
    /// The n-th machine this one spawned.
    Spawned(usize),
    /// This machine.
    Myself,
    /// Destination: everyone. Reaction source: anyone.
    Everyone,
    Machine(MachineId),
}

/// What a reaction installed by a script leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Then {
    Run(usize),
    Halt,
    Listen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Spawn(String),
    Emit { to: Target, kind: String, ack: bool },
    On {
        from: Target,
        kind: String,
        then: Then,
    },
    Forget { from: Target, kind: String },
    Note(String),
    /// Leave the current block for block `n` right away.
    Goto(usize),
    Halt,
}

impl Action {
    pub fn spawn(policy: impl Into<String>) -> Self {
        Action::Spawn(policy.into())
    }

    pub fn emit(to: Target, kind: impl Into<String>) -> Self {
        Action::Emit {
            to,
            kind: kind.into(),
            ack: false,
        }
    }

    pub fn emit_with_ack(to: Target, kind: impl Into<String>) -> Self {
        Action::Emit {
            to,
            kind: kind.into(),
            ack: true,
        }
    }

    pub fn on(from: Target, kind: impl Into<String>, then: Then) -> Self {
        Action::On {
            from,
            kind: kind.into(),
            then,
        }
    }

    pub fn forget(from: Target, kind: impl Into<String>) -> Self {
        Action::Forget {
            from,
            kind: kind.into(),
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Action::Note(text.into())
    }
}

/// Setup actions plus numbered blocks.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub setup: Vec<Action>,
    pub blocks: Vec<Vec<Action>>,
}

impl Script {
    pub fn new(setup: Vec<Action>) -> Self {
        Self {
            setup,
            blocks: Vec::new(),
        }
    }

    /// Append a block; its number is the count of blocks added before it.
    pub fn with_block(mut self, actions: Vec<Action>) -> Self {
        self.blocks.push(actions);
        self
    }
}

// ============================================================================
// Journal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Started { context: MachineId },
    Spawned { child: MachineId },
    Entered { block: usize, event: Option<Event> },
    Note(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub machine: MachineId,
    pub policy: String,
    pub record: Record,
}

#[derive(Debug, Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<Entry>,
}

#[derive(Debug)]
pub struct JournalReader {
    rx: mpsc::UnboundedReceiver<Entry>,
}

pub fn journal() -> (Journal, JournalReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Journal { tx }, JournalReader { rx })
}

impl Journal {
    pub fn write(&self, machine: MachineId, policy: &str, record: Record) {
        // a reader dropped early only loses observations
        let _ = self.tx.send(Entry {
            machine,
            policy: policy.to_owned(),
            record,
        });
    }
}

impl JournalReader {
    /// Everything written so far.
    pub fn drain(&mut self) -> Vec<Entry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            entries.push(entry);
        }
        entries
    }
}

// ============================================================================
// Scripted policy
// ============================================================================

/// Index of the script block a machine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block(pub usize);

pub struct ScriptPolicy {
    name: String,
    script: Arc<Script>,
    journal: Journal,
    spawned: Vec<MachineId>,
}

impl ScriptPolicy {
    pub fn new(name: impl Into<String>, script: Arc<Script>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            script,
            journal,
            spawned: Vec::new(),
        }
    }

    fn resolve(&self, target: &Target, cx: &Context<Block>) -> Result<MachineId> {
        Ok(match target {
            Target::Parent => cx.context_id(),
            Target::Sender => cx.sender(),
            Target::Myself => cx.id(),
            Target::Everyone => MachineId::NONE,
            Target::Machine(id) => *id,
            Target::Spawned(n) => *self
                .spawned
                .get(*n)
                .ok_or_else(|| anyhow!("{} has not spawned machine #{n}", self.name))?,
        })
    }

    async fn execute(
        &mut self,
        actions: &[Action],
        cx: &mut Context<Block>,
    ) -> Result<Step<Block>> {
        for action in actions {
            match action {
                Action::Spawn(policy) => {
                    let child = cx.spawn(policy).await?;
                    self.spawned.push(child);
                    self.journal
                        .write(cx.id(), &self.name, Record::Spawned { child });
                }
                Action::Emit { to, kind, ack } => {
                    let destination = self.resolve(to, cx)?;
                    if *ack {
                        cx.emit_with_ack(destination, kind.as_str()).await?;
                    } else {
                        cx.emit(destination, kind.as_str()).await?;
                    }
                }
                Action::On { from, kind, then } => {
                    let source = self.resolve(from, cx)?;
                    let step = match then {
                        Then::Run(block) => Step::Enter(Block(*block)),
                        Then::Halt => Step::Halt,
                        Then::Listen => Step::Listen,
                    };
                    cx.react(source, kind.as_str(), step);
                }
                Action::Forget { from, kind } => {
                    let source = self.resolve(from, cx)?;
                    cx.ignore(source, kind.as_str());
                }
                Action::Note(text) => {
                    self.journal
                        .write(cx.id(), &self.name, Record::Note(text.clone()));
                }
                Action::Goto(block) => return Ok(Step::Enter(Block(*block))),
                Action::Halt => return Ok(Step::Halt),
            }
        }
        Ok(Step::Listen)
    }
}

#[async_trait]
impl Policy for ScriptPolicy {
    type State = Block;

    async fn setup(&mut self, cx: &mut Context<Block>) -> anyhow::Result<Step<Block>> {
        self.journal.write(
            cx.id(),
            &self.name,
            Record::Started {
                context: cx.context_id(),
            },
        );
        let script = Arc::clone(&self.script);
        self.execute(&script.setup, cx).await
    }

    async fn on_state(
        &mut self,
        state: Block,
        cx: &mut Context<Block>,
    ) -> anyhow::Result<Step<Block>> {
        self.journal.write(
            cx.id(),
            &self.name,
            Record::Entered {
                block: state.0,
                event: cx.event().cloned(),
            },
        );
        let script = Arc::clone(&self.script);
        let actions = script
            .blocks
            .get(state.0)
            .with_context(|| format!("{} has no block {}", self.name, state.0))?;
        self.execute(actions, cx).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Result of a harness run.
#[derive(Debug)]
pub struct Outcome {
    pub report: KernelReport,
    pub entries: Vec<Entry>,
}

impl Outcome {
    /// Entries written by `machine`.
    pub fn of(&self, machine: MachineId) -> impl Iterator<Item = &Record> {
        self.entries
            .iter()
            .filter(move |entry| entry.machine == machine)
            .map(|entry| &entry.record)
    }

    /// Ids handed out to spawn requests, in journal order.
    pub fn spawned(&self) -> Vec<MachineId> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.record {
                Record::Spawned { child } => Some(child),
                _ => None,
            })
            .collect()
    }

    /// Notes written by `machine`.
    pub fn notes(&self, machine: MachineId) -> Vec<&str> {
        self.of(machine)
            .filter_map(|record| match record {
                Record::Note(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

pub struct Harness {
    registry: Registry,
    journal: Journal,
    reader: JournalReader,
    deadline: Duration,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let (journal, reader) = journal();
        Self {
            registry: Registry::new(),
            journal,
            reader,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn script(mut self, name: &str, script: Script) -> Self {
        let script = Arc::new(script);
        let journal = self.journal.clone();
        let owned = name.to_owned();
        self.registry.register(name, move || {
            ScriptPolicy::new(owned.clone(), Arc::clone(&script), journal.clone())
        });
        self
    }

    /// Register an arbitrary policy next to the scripted ones.
    pub fn policy<P, F>(mut self, name: &str, factory: F) -> Self
    where
        P: Policy,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.registry.register(name, factory);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the kernel from `root` until quiescence, failing if it takes
    /// longer than the deadline.
    pub async fn run(self, root: &str) -> Result<Outcome> {
        let Harness {
            registry,
            journal,
            mut reader,
            deadline,
        } = self;
        drop(journal);

        let kernel = Kernel::builder().with_registry(registry).build();
        let report = tokio::time::timeout(deadline, kernel.run(root))
            .await
            .map_err(|_| anyhow!("kernel still running after {deadline:?}"))??;

        Ok(Outcome {
            report,
            entries: reader.drain(),
        })
    }
}
