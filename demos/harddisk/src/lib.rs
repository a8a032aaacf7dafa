//! # Hard Disk Demo
//!
//! A CPU serving a disk read to one program while another hands it a single
//! acknowledged `cycle`.
//!
//! ```text
//!              CPU (root)
//!      ┌────────┼─────────┐
//!      HD      ProgA     ProgB
//!      │
//!    HDHead
//! ```
//!
//! ProgA asks the CPU for a read. The CPU forwards it to the disk, the disk
//! has its head seek until it finds the data, and the interrupt travels back
//! up to ProgA as `return`. ProgA then asks the CPU to `shutdown`, and the
//! CPU's halt cascades through everything it spawned.

use anyhow::Result;
use async_trait::async_trait;
use machina_core::{ack_kind, Context, MachineId, Policy, Registry, Step};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CPU: &str = "CPU";
pub const HD: &str = "HD";
pub const HD_HEAD: &str = "HDHead";
pub const PROG_A: &str = "ProgA";
pub const PROG_B: &str = "ProgB";

// ============================================================================
// Configuration
// ============================================================================

/// Knobs for a demo run, read from an optional JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Chance that a single head seek finds the data.
    pub seek_success: f32,
    /// Seed for the head's seek rolls. Unseeded runs differ every time.
    pub seed: Option<u64>,
    /// Policy launched as machine 1.
    pub root: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seek_success: 0.2,
            seed: None,
            root: CPU.to_owned(),
        }
    }
}

impl DemoConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: DemoConfig = serde_json::from_str(raw)?;
        anyhow::ensure!(
            config.seek_success > 0.0 && config.seek_success <= 1.0,
            "seek_success must be in (0, 1], got {}",
            config.seek_success
        );
        Ok(config)
    }
}

/// All five demo policies, configured by `config`.
pub fn registry(config: &DemoConfig) -> Registry {
    let mut registry = Registry::new();
    let seek_success = config.seek_success;
    let seed = config.seed;

    registry
        .register(CPU, Cpu::default)
        .register(HD, Disk::default)
        .register(HD_HEAD, move || DiskHead::new(seek_success, seed))
        .register(PROG_A, ProgA::default)
        .register(PROG_B, || ProgB);
    registry
}

// ============================================================================
// CPU
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Cycle,
    HdRead,
    HdInterrupt,
}

#[derive(Debug)]
pub struct Cpu {
    hd: MachineId,
    hd_reader: MachineId,
    cycles: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            hd: MachineId::NONE,
            hd_reader: MachineId::NONE,
            cycles: 0,
        }
    }
}

#[async_trait]
impl Policy for Cpu {
    type State = CpuState;

    async fn setup(&mut self, cx: &mut Context<CpuState>) -> Result<Step<CpuState>> {
        self.hd = cx.spawn(HD).await?;
        let prog_a = cx.spawn(PROG_A).await?;
        let prog_b = cx.spawn(PROG_B).await?;
        info!(hd = %self.hd, %prog_a, %prog_b, "cpu booted");

        cx.react_any("cycle", Step::Enter(CpuState::Cycle));
        cx.react_any("read", Step::Enter(CpuState::HdRead));
        cx.react_any("shutdown", Step::Halt);
        Ok(Step::Listen)
    }

    async fn on_state(
        &mut self,
        state: CpuState,
        cx: &mut Context<CpuState>,
    ) -> Result<Step<CpuState>> {
        match state {
            CpuState::Cycle => {
                self.cycles += 1;
                debug!(cycles = self.cycles, from = %cx.sender(), "cycle");
            }
            CpuState::HdRead => {
                self.hd_reader = cx.sender();
                cx.emit(self.hd, "read").await?;
                cx.react(self.hd, "interrupt", Step::Enter(CpuState::HdInterrupt));
            }
            CpuState::HdInterrupt => {
                cx.emit(self.hd_reader, "return").await?;
                cx.ignore(self.hd, "interrupt");
                info!(reader = %self.hd_reader, cycles = self.cycles, "read served");
            }
        }
        Ok(Step::Listen)
    }
}

// ============================================================================
// HD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Seek,
    FoundData,
}

#[derive(Debug)]
pub struct Disk {
    head: MachineId,
}

impl Default for Disk {
    fn default() -> Self {
        Self {
            head: MachineId::NONE,
        }
    }
}

#[async_trait]
impl Policy for Disk {
    type State = DiskState;

    async fn setup(&mut self, cx: &mut Context<DiskState>) -> Result<Step<DiskState>> {
        self.head = cx.spawn(HD_HEAD).await?;
        cx.react(cx.context_id(), "read", Step::Enter(DiskState::Seek));
        Ok(Step::Listen)
    }

    async fn on_state(
        &mut self,
        state: DiskState,
        cx: &mut Context<DiskState>,
    ) -> Result<Step<DiskState>> {
        let cpu = cx.context_id();
        match state {
            DiskState::Seek => {
                // one read in flight at a time
                cx.ignore(cpu, "read");
                cx.emit(self.head, "seek").await?;
                cx.react(self.head, "found_data", Step::Enter(DiskState::FoundData));
            }
            DiskState::FoundData => {
                cx.ignore(self.head, "found_data");
                cx.react(cpu, "read", Step::Enter(DiskState::Seek));
                cx.emit(cpu, "interrupt").await?;
            }
        }
        Ok(Step::Listen)
    }
}

// ============================================================================
// HDHead
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    Seek,
}

#[derive(Debug)]
pub struct DiskHead {
    seek_success: f32,
    rng: fastrand::Rng,
    attempts: u64,
}

impl DiskHead {
    pub fn new(seek_success: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            seek_success,
            rng,
            attempts: 0,
        }
    }
}

#[async_trait]
impl Policy for DiskHead {
    type State = HeadState;

    async fn setup(&mut self, cx: &mut Context<HeadState>) -> Result<Step<HeadState>> {
        cx.react(cx.context_id(), "seek", Step::Enter(HeadState::Seek));
        Ok(Step::Listen)
    }

    async fn on_state(
        &mut self,
        state: HeadState,
        cx: &mut Context<HeadState>,
    ) -> Result<Step<HeadState>> {
        match state {
            HeadState::Seek => {
                self.attempts += 1;
                if self.rng.f32() < self.seek_success {
                    info!(attempts = self.attempts, "data found");
                    self.attempts = 0;
                    cx.emit(cx.context_id(), "found_data").await?;
                    return Ok(Step::Listen);
                }
                debug!(attempts = self.attempts, "seek missed");
                tokio::task::yield_now().await;
                Ok(Step::Enter(HeadState::Seek))
            }
        }
    }
}

// ============================================================================
// ProgA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgAState {
    Program,
    Finish,
}

/// Reads one block through the CPU, then shuts the CPU down.
#[derive(Debug, Default)]
pub struct ProgA;

#[async_trait]
impl Policy for ProgA {
    type State = ProgAState;

    async fn setup(&mut self, _: &mut Context<ProgAState>) -> Result<Step<ProgAState>> {
        Ok(Step::Enter(ProgAState::Program))
    }

    async fn on_state(
        &mut self,
        state: ProgAState,
        cx: &mut Context<ProgAState>,
    ) -> Result<Step<ProgAState>> {
        let cpu = cx.context_id();
        match state {
            ProgAState::Program => {
                cx.emit(cpu, "read").await?;
                cx.react(cpu, "return", Step::Enter(ProgAState::Finish));
            }
            ProgAState::Finish => {
                cx.ignore(cpu, "return");
                info!("read returned, requesting shutdown");
                cx.emit(cpu, "shutdown").await?;
            }
        }
        Ok(Step::Listen)
    }
}

// ============================================================================
// ProgB
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgBState {
    Cycle,
    Acked,
}

/// Hands the CPU one acknowledged `cycle`, then idles until the CPU halts.
#[derive(Debug)]
pub struct ProgB;

#[async_trait]
impl Policy for ProgB {
    type State = ProgBState;

    async fn setup(&mut self, _: &mut Context<ProgBState>) -> Result<Step<ProgBState>> {
        Ok(Step::Enter(ProgBState::Cycle))
    }

    async fn on_state(
        &mut self,
        state: ProgBState,
        cx: &mut Context<ProgBState>,
    ) -> Result<Step<ProgBState>> {
        let cpu = cx.context_id();
        match state {
            ProgBState::Cycle => {
                cx.emit_with_ack(cpu, "cycle").await?;
                cx.react(cpu, ack_kind("cycle"), Step::Enter(ProgBState::Acked));
            }
            ProgBState::Acked => {
                cx.ignore(cpu, ack_kind("cycle"));
                debug!("cycle acknowledged");
            }
        }
        Ok(Step::Listen)
    }
}
