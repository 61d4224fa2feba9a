//! Registry of mocked systems and their modules.
//!
//! The registry is filled once, lazily, from a [`ConfigSource`]. Module
//! endpoints come from the configuration plus any [`EndpointProvider`]
//! registered for the `(system, module)` pair.

use crate::error::{MockError, Result};
use crate::model::{Endpoint, Module, System};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Source of system and module descriptors.
///
/// Loads run synchronously on the async task that first initializes the
/// registry, so implementations must not block on I/O for long.
pub trait ConfigSource: Send + Sync {
    fn load_systems(&self) -> anyhow::Result<Vec<System>>;
    fn load_modules(&self, system_id: &str) -> anyhow::Result<Vec<Module>>;
}

/// Supplies code-defined endpoints for one `(system, module)` pair.
pub trait EndpointProvider: Send + Sync {
    fn endpoints(&self, system_id: &str) -> Vec<Endpoint>;
}

/// Endpoint providers keyed by `(system, module)`.
#[derive(Default, Clone)]
pub struct HandlerCatalog {
    providers: HashMap<(String, String), Vec<Arc<dyn EndpointProvider>>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        system_id: impl Into<String>,
        module_id: impl Into<String>,
        provider: Arc<dyn EndpointProvider>,
    ) {
        self.providers
            .entry((system_id.into(), module_id.into()))
            .or_default()
            .push(provider);
    }

    pub fn with_provider(
        mut self,
        system_id: impl Into<String>,
        module_id: impl Into<String>,
        provider: Arc<dyn EndpointProvider>,
    ) -> Self {
        self.register(system_id, module_id, provider);
        self
    }

    /// All provider endpoints for a module.
    pub fn endpoints_for(&self, system_id: &str, module_id: &str) -> Vec<Endpoint> {
        self.providers
            .get(&(system_id.to_string(), module_id.to_string()))
            .map(|providers| {
                providers
                    .iter()
                    .flat_map(|p| p.endpoints(system_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn keys(&self) -> impl Iterator<Item = &(String, String)> {
        self.providers.keys()
    }
}

/// Health of one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemHealth {
    pub system_id: String,
    pub registered: bool,
    pub module_count: usize,
    pub healthy: bool,
}

#[derive(Clone)]
struct SystemEntry {
    system: Arc<System>,
    modules: Vec<Arc<Module>>,
}

#[derive(Default, Clone)]
struct RegistryState {
    systems: Vec<SystemEntry>,
}

impl RegistryState {
    fn find(&self, system_id: &str) -> Option<&SystemEntry> {
        self.systems.iter().find(|e| e.system.id == system_id)
    }
}

/// Registry of systems and modules.
pub struct SystemRegistry {
    source: Arc<dyn ConfigSource>,
    catalog: HandlerCatalog,
    state: ArcSwap<RegistryState>,
    write_gate: Mutex<()>,
    initialized: OnceCell<()>,
}

impl SystemRegistry {
    pub fn new(source: Arc<dyn ConfigSource>, catalog: HandlerCatalog) -> Self {
        Self {
            source,
            catalog,
            state: ArcSwap::from_pointee(RegistryState::default()),
            write_gate: Mutex::new(()),
            initialized: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Load systems and modules from the configuration source, exactly once.
    ///
    /// Concurrent callers wait for the first one. A failure to list systems is
    /// returned and leaves the registry uninitialized for the next caller.
    /// The load itself runs inline on the calling task; [`ConfigSource`]
    /// implementations are expected to be in-memory or otherwise cheap.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async { self.load() })
            .await
            .map(|_| ())
    }

    fn load(&self) -> Result<()> {
        let systems = self
            .source
            .load_systems()
            .map_err(|e| MockError::configuration(format!("failed to load systems: {:#}", e)))?;

        for system in systems {
            let system_id = system.id.clone();
            if let Err(e) = self.register(system) {
                warn!(system = %system_id, error = %e, "Skipping system");
                continue;
            }

            let modules = match self.source.load_modules(&system_id) {
                Ok(modules) => modules,
                Err(e) => {
                    warn!(system = %system_id, error = %e, "Failed to load modules");
                    continue;
                }
            };

            for mut module in modules {
                module.system_id = system_id.clone();
                module
                    .endpoints
                    .extend(self.catalog.endpoints_for(&system_id, &module.id));
                let module_id = module.id.clone();
                if let Err(e) = self.register_module(module) {
                    warn!(system = %system_id, module = %module_id, error = %e, "Skipping module");
                }
            }
        }

        for (system_id, module_id) in self.catalog.keys() {
            let known = self
                .modules_for(system_id)
                .iter()
                .any(|m| &m.id == module_id);
            if !known {
                warn!(
                    system = %system_id,
                    module = %module_id,
                    "Endpoint provider registered for an unknown module"
                );
            }
        }

        let state = self.state.load();
        info!(
            systems = state.systems.len(),
            modules = state.systems.iter().map(|e| e.modules.len()).sum::<usize>(),
            "System registry initialized"
        );
        Ok(())
    }

    /// Register a system. System ids are unique registry-wide.
    pub fn register(&self, system: System) -> Result<()> {
        if system.id.trim().is_empty() {
            return Err(MockError::configuration("system id cannot be empty"));
        }

        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        let current = self.state.load();
        if current.find(&system.id).is_some() {
            return Err(MockError::configuration(format!(
                "duplicate system id '{}'",
                system.id
            )));
        }

        let mut next = RegistryState::clone(&current);
        debug!(system = %system.id, name = %system.name, "Registering system");
        next.systems.push(SystemEntry {
            system: Arc::new(system),
            modules: Vec::new(),
        });
        self.state.store(Arc::new(next));
        Ok(())
    }

    /// Register a module under its owning system. Module ids are unique per system.
    pub fn register_module(&self, module: Module) -> Result<()> {
        if module.id.trim().is_empty() {
            return Err(MockError::configuration("module id cannot be empty"));
        }

        let _gate = self.write_gate.lock().unwrap_or_else(|p| p.into_inner());
        let mut next = RegistryState::clone(&self.state.load());
        let entry = next
            .systems
            .iter_mut()
            .find(|e| e.system.id == module.system_id)
            .ok_or_else(|| {
                MockError::configuration(format!("unknown system '{}'", module.system_id))
            })?;

        if entry.modules.iter().any(|m| m.id == module.id) {
            return Err(MockError::configuration(format!(
                "duplicate module id '{}' in system '{}'",
                module.id, module.system_id
            )));
        }

        debug!(
            system = %module.system_id,
            module = %module.id,
            endpoints = module.endpoints.len(),
            "Registering module"
        );
        entry.modules.push(Arc::new(module));
        self.state.store(Arc::new(next));
        Ok(())
    }

    pub fn get(&self, system_id: &str) -> Option<Arc<System>> {
        self.state.load().find(system_id).map(|e| e.system.clone())
    }

    /// All systems in registration order.
    pub fn list_all(&self) -> Vec<Arc<System>> {
        self.state
            .load()
            .systems
            .iter()
            .map(|e| e.system.clone())
            .collect()
    }

    pub fn modules_for(&self, system_id: &str) -> Vec<Arc<Module>> {
        self.state
            .load()
            .find(system_id)
            .map(|e| e.modules.clone())
            .unwrap_or_default()
    }

    /// A system is healthy when it is registered and has at least one module.
    pub fn health_of(&self, system_id: &str) -> SystemHealth {
        let state = self.state.load();
        let entry = state.find(system_id);
        let module_count = entry.map(|e| e.modules.len()).unwrap_or(0);
        SystemHealth {
            system_id: system_id.to_string(),
            registered: entry.is_some(),
            module_count,
            healthy: entry.is_some() && module_count > 0,
        }
    }
}
