//! The probe contract and the protocol registry.
//!
//! Probes are instantiated at run-time via a constructor-function looked up
//! by protocol name. Implementing a new protocol means implementing the
//! three methods of [`Probe`] and registering a constructor.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{OnceLock, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::test::{Options, Test};

/// Argument name to validation-regex mapping for one probe.
///
/// An empty argument value is always accepted, so a pattern only has to
/// describe non-empty values.
pub type Schema = HashMap<&'static str, &'static str>;

/// Arguments every probe accepts, regardless of protocol.
pub fn base_schema() -> Schema {
    let mut known = Schema::new();
    known.insert("max-retries", "^[0-9]+$");
    known
}

/// One protocol tester.
#[async_trait]
pub trait Probe: Send + Sync {
    /// The arguments this probe understands, with validation patterns.
    fn schema(&self) -> Schema;

    /// Sample usage-instructions for self-documentation purposes.
    fn example(&self) -> &'static str;

    /// Execute the test against the given address.
    ///
    /// `ip` is always a concrete address chosen by the caller; probes never
    /// do their own name resolution. Returns `Ok(())` when the test passed.
    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()>;
}

/// A probe constructor-function.
pub type ProbeCtor = Box<dyn Fn() -> Box<dyn Probe> + Send + Sync>;

/// Name to constructor mapping for the known protocol testers.
///
/// Reads take a shared lock and writes an exclusive one, but in practice
/// all registration happens during start-up, before the first lookup.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, ProbeCtor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol tester under the given name.
    pub fn register<F>(&self, name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Probe> + Send + Sync + 'static,
    {
        let mut map = self.inner.write().expect("registry lock poisoned");
        map.insert(name.to_string(), Box::new(ctor));
    }

    /// Instantiate the probe registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Box<dyn Probe>> {
        let map = self.inner.read().expect("registry lock poisoned");
        map.get(name).map(|ctor| ctor())
    }

    /// The names of all registered protocol testers, sorted.
    pub fn names(&self) -> Vec<String> {
        let map = self.inner.read().expect("registry lock poisoned");
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The process-wide registry, populated once during start-up.
pub fn global() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(Registry::new)
}
