//! Named policies the controller can launch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{info_span, Instrument};

use crate::error::KernelError;
use crate::machine::{Machine, MachineSpec};
use crate::policy::Policy;

/// Builds a fresh policy and runs it as a machine.
pub type Launcher =
    Arc<dyn Fn(MachineSpec) -> BoxFuture<'static, Result<(), KernelError>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    launchers: BTreeMap<String, Launcher>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`. A later registration replaces an
    /// earlier one.
    pub fn register<P, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        P: Policy,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let launcher: Launcher = Arc::new(move |spec: MachineSpec| {
            let span = info_span!("machine", id = %spec.id, policy = %spec.policy);
            Machine::new(factory(), spec).run().instrument(span).boxed()
        });
        self.launchers.insert(name.into(), launcher);
        self
    }

    pub fn launcher(&self, name: &str) -> Result<Launcher, KernelError> {
        self.launchers
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::UnknownPolicy(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.launchers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.launchers.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("policies", &self.launchers.keys().collect::<Vec<_>>())
            .finish()
    }
}
