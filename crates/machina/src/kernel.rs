//! Process bootstrap.

use tracing::info;

use crate::controller::{Controller, KernelReport};
use crate::error::KernelError;
use crate::event::MachineId;
use crate::policy::Policy;
use crate::registry::Registry;

/// Collects the policies a kernel can launch.
#[derive(Debug, Default)]
pub struct KernelBuilder {
    registry: Registry,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy<P, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        P: Policy,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.registry.register(name, factory);
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Kernel {
        Kernel {
            registry: self.registry,
        }
    }
}

pub struct Kernel {
    registry: Registry,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// Launch `root` as machine 1 with no parent and run until no machine
    /// is live.
    pub async fn run(self, root: &str) -> Result<KernelReport, KernelError> {
        let mut controller = Controller::new(self.registry);
        let root_id = controller.launch(root, MachineId::NONE)?;
        info!(machine = %root_id, policy = root, "kernel started");

        let report = controller.run().await?;
        info!(
            launched = report.launched,
            routed = report.unicasts + report.broadcasts,
            deliveries = report.deliveries,
            "kernel quiescent"
        );
        Ok(report)
    }
}
