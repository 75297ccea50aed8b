//! Wiring of the engine for the `edgehub run` command

use edgehub_core::{AdapterFactory, EdgeHubConfig, EdgeHubResult, MessageBus};
use edgehub_runtime::{LocalBus, RuntimeBuilder, SupervisorHandle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A running hub connection together with the local bus it feeds
pub struct EdgeHubApp {
    bus: LocalBus,
    handle: SupervisorHandle,
    monitors: Vec<JoinHandle<()>>,
}

impl EdgeHubApp {
    /// Start the engine, with one module per routed group logging whatever
    /// the hub delivers to it
    pub fn start(config: EdgeHubConfig, factory: Arc<dyn AdapterFactory>) -> EdgeHubResult<Self> {
        let bus = RuntimeBuilder::local_bus(&config);

        let mut groups: Vec<String> = config.group_routes.values().cloned().collect();
        groups.sort();
        groups.dedup();

        let monitors = groups
            .iter()
            .map(|group| {
                let module = monitor_module(group);
                bus.add_module_group(&module, group);
                spawn_monitor(bus.clone(), module)
            })
            .collect();

        let handle = RuntimeBuilder::new(config)
            .with_adapter_factory(factory)
            .with_bus(Arc::new(bus.clone()))
            .build_and_start()?;

        Ok(Self {
            bus,
            handle,
            monitors,
        })
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn handle(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// Stop the engine and the group monitors
    pub async fn shutdown(mut self) -> EdgeHubResult<()> {
        self.handle.shutdown().await?;
        for monitor in self.monitors.drain(..) {
            monitor.abort();
        }
        info!("EdgeHub stopped");
        Ok(())
    }
}

/// Bus module name of the monitor for `group`
pub fn monitor_module(group: &str) -> String {
    format!("{}-monitor", group)
}

fn spawn_monitor(bus: LocalBus, module: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(message) = bus.receive(&module).await {
            info!(
                "[{}] {} {} {} from {}",
                module,
                message.operation(),
                message.resource(),
                message.id(),
                message.source()
            );
        }
    })
}
