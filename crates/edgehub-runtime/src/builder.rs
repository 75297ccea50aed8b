//! Runtime Builder API
//!
//! Provides a builder-style API for consumers (CLI/tests) to plug a
//! connection factory and a local bus into the engine and get a running
//! supervisor handle back.

use crate::{
    bus::LocalBus,
    correlator::SyncCorrelator,
    supervisor::{ReconnectSupervisor, SupervisorHandle},
};
use edgehub_core::{modules, AdapterFactory, EdgeHubConfig, EdgeHubError, EdgeHubResult, MessageBus};
use std::sync::Arc;
use tracing::info;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for the EdgeHub routing engine
pub struct RuntimeBuilder {
    config: EdgeHubConfig,
    factory: Option<Arc<dyn AdapterFactory>>,
    bus: Option<Arc<dyn MessageBus>>,
    correlator: SyncCorrelator,
    hub_module: String,
}

impl RuntimeBuilder {
    /// Create a new runtime builder
    pub fn new(config: EdgeHubConfig) -> Self {
        Self {
            config,
            factory: None,
            bus: None,
            correlator: SyncCorrelator::new(),
            hub_module: modules::EDGE_HUB_MODULE.to_string(),
        }
    }

    /// Set the factory used to open each connection
    pub fn with_adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Route through an existing bus instead of a fresh [`LocalBus`]
    ///
    /// The bus must already know the hub module (see
    /// [`hub_module`](Self::hub_module)).
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Share a correlator with other components
    pub fn with_correlator(mut self, correlator: SyncCorrelator) -> Self {
        self.correlator = correlator;
        self
    }

    /// Name of the bus module whose inbox feeds the outbound router
    pub fn hub_module(mut self, name: impl Into<String>) -> Self {
        self.hub_module = name.into();
        self
    }

    /// A local bus sized from `config` with the hub module registered
    pub fn local_bus(config: &EdgeHubConfig) -> LocalBus {
        let bus = LocalBus::new(config.bus_buffer_size);
        bus.add_module(modules::EDGE_HUB_MODULE);
        bus
    }

    /// Validate the configuration and assemble the supervisor
    pub fn build(self) -> EdgeHubResult<ReconnectSupervisor> {
        self.config.validate()?;

        let factory = self
            .factory
            .ok_or_else(|| EdgeHubError::config_error("no adapter factory configured"))?;

        let bus = match self.bus {
            Some(bus) => bus,
            None => {
                let bus = LocalBus::new(self.config.bus_buffer_size);
                bus.add_module(&self.hub_module);
                Arc::new(bus)
            }
        };

        Ok(ReconnectSupervisor::new(
            self.config,
            factory,
            bus,
            self.correlator,
            self.hub_module,
        ))
    }

    /// Build and start the engine
    pub fn build_and_start(self) -> EdgeHubResult<SupervisorHandle> {
        info!("Building EdgeHub runtime");
        let supervisor = self.build()?;
        Ok(supervisor.start())
    }
}
