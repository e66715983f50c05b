//! The execution environment facade.
//!
//! [`ExEn`] wires configuration, the controller catalog, the language
//! builder, the command registry, the bus and the dispatcher together:
//!
//! ```text
//!   Config ──► LanguageBuilder (une → UneRuntime) ──┐
//!          └─► EventBus ◄── Dispatcher ◄── Runtime ◄┘
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

use crate::bus::EventBus;
use crate::dispatch::Dispatcher;
use crate::driver::{ControllerCatalog, ControllerConstructor};
use crate::language::une::UneRuntime;
use crate::language::{LanguageBuilder, LanguageConstructor, LanguageRuntime};
use crate::message::Message;
use crate::model::Model;
use crate::registry::Runtime;
use crate::transport::{GridBridge, GridClient, GridServer};
use crate::types::{Config, Error, LanguageConfig, NodeId, Result, NATIVE_IMPLEMENTATION};

/// One command that could not be admitted.
#[derive(Debug)]
pub struct LoadFailure {
    pub name: String,
    pub error: Error,
}

/// Outcome of [`ExEn::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub admitted: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct ExEn {
    config: Config,
    node: NodeId,
    bus: EventBus,
    controllers: Arc<ControllerCatalog>,
    languages: Arc<LanguageBuilder>,
    runtime: Arc<Runtime>,
    dispatcher: Arc<Dispatcher>,
    grid: Mutex<Option<Arc<GridBridge>>>,
}

impl ExEn {
    pub fn new(config: Config) -> Self {
        let bus = EventBus::new(config.bus.clone());
        let controllers = Arc::new(ControllerCatalog::with_builtins());
        let languages = Arc::new(LanguageBuilder::new(config.languages.clone()));

        let catalog = Arc::clone(&controllers);
        let native: LanguageConstructor =
            Arc::new(move |_: &LanguageConfig| -> Result<Arc<dyn LanguageRuntime>> {
                Ok(Arc::new(UneRuntime::new(Arc::clone(&catalog))))
            });
        languages.register(NATIVE_IMPLEMENTATION, native);

        let runtime = Arc::new(Runtime::new(bus.clone(), Arc::clone(&languages)));
        let dispatcher = Arc::new(Dispatcher::new(&runtime));
        bus.add(dispatcher.clone());

        Self {
            config,
            node: NodeId::new(),
            bus,
            controllers,
            languages,
            runtime,
            dispatcher,
            grid: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn controllers(&self) -> &ControllerCatalog {
        &self.controllers
    }

    pub fn languages(&self) -> &LanguageBuilder {
        &self.languages
    }

    pub fn register_language(&self, implementation: &str, constructor: LanguageConstructor) {
        self.languages.register(implementation, constructor);
    }

    pub fn register_controller(&self, name: &str, constructor: ControllerConstructor) {
        self.controllers.register(name, constructor);
    }

    pub fn post(&self, message: Message) -> Result<()> {
        self.bus.post(message)
    }

    pub fn start(&self) -> Result<()> {
        self.bus.start()?;
        tracing::info!(node = %self.node, "exen started");
        Ok(())
    }

    /// Remove every command, unhook the grid and stop the bus.
    pub fn stop(&self) {
        if let Some(bridge) = self.grid.lock().take() {
            bridge.detach();
        }
        let removed = self.runtime.clear();
        self.bus.stop();
        tracing::info!(node = %self.node, removed = removed.len(), "exen stopped");
    }

    /// Admit every command of `model` in prerequisite order. Command
    /// failures are collected and later commands are still attempted; a host
    /// fault such as a misconfigured language stops the load and
    /// is returned. Commands admitted before it stay loaded.
    pub fn load(&self, model: &Model) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for (name, command) in model.commands() {
            match command.and_then(|command| self.runtime.add(command)) {
                Ok(()) => report.admitted.push(name),
                Err(error) if error.is_host_fault() => {
                    tracing::error!(command = %name, error = %error, "model load aborted");
                    return Err(error);
                }
                Err(error) => report.failures.push(LoadFailure { name, error }),
            }
        }
        if report.is_complete() {
            tracing::info!(commands = report.admitted.len(), "model loaded");
        } else {
            tracing::warn!(
                admitted = report.admitted.len(),
                failed = report.failures.len(),
                "model loaded with failures"
            );
        }
        Ok(report)
    }

    /// Replicate device changes through the given transports.
    pub fn enable_grid(
        &self,
        server: Option<Arc<dyn GridServer>>,
        client: Option<Arc<dyn GridClient>>,
    ) -> Arc<GridBridge> {
        let bridge = GridBridge::new(self.node.clone(), self.bus.clone());
        if let Some(server) = server {
            bridge.attach_server(server);
        }
        if let Some(client) = client {
            bridge.attach_client(client);
        }
        if let Some(previous) = self.grid.lock().replace(Arc::clone(&bridge)) {
            previous.detach();
        }
        bridge
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Controller, VirtualController};

    #[test]
    fn test_load_collects_failures() {
        let exen = ExEn::new(Config::default());
        let model = Model::from_json_str(
            r#"{
                "scripts": [{"name": "Hw", "code": "{\"controller\": \"virtual\"}"}],
                "drivers": [{"name": "Drv", "script": "Hw"}, {"name": "Orphan", "script": "Nope"}],
                "devices": [{"name": "Lamp", "driver": "Drv"}, {"name": "Lost", "driver": "Orphan"}],
                "rules": [{"name": "Bad", "when": "Lamp ==", "code": "[]"}]
            }"#,
        )
        .unwrap();

        let report = exen.load(&model).unwrap();
        assert_eq!(report.admitted, vec!["Hw", "Drv", "Lamp"]);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["Orphan", "Lost", "Bad"]);
        assert!(matches!(report.failures[2].error, Error::Prepare { .. }));
        assert!(!report.is_complete());
    }

    #[test]
    fn test_custom_controller_is_reachable_from_une() {
        let exen = ExEn::new(Config::default());
        exen.register_controller(
            "dmx",
            Arc::new(|| Box::new(VirtualController::default()) as Box<dyn Controller>),
        );
        assert!(exen.controllers().contains("DMX"));

        let model = Model::from_json_str(
            r#"{
                "scripts": [{"name": "Dmx", "code": "{\"controller\": \"DMX\"}"}],
                "drivers": [{"name": "Stage", "script": "Dmx"}],
                "devices": [{"name": "Spot", "driver": "Stage"}]
            }"#,
        )
        .unwrap();
        assert!(exen.load(&model).unwrap().is_complete());
        let stage = exen.runtime().get_driver("Stage").unwrap();
        assert!(stage.binding("Spot").unwrap().controller().is_some());
    }

    #[test]
    fn test_unconfigured_language_aborts_the_load() {
        let exen = ExEn::new(Config::default());
        let model = Model::from_json_str(
            r#"{
                "scripts": [
                    {"name": "Hw", "code": "{\"controller\": \"virtual\"}"},
                    {"name": "Py", "language": "python", "code": "print(1)"},
                    {"name": "After", "code": "[]"}
                ]
            }"#,
        )
        .unwrap();

        let err = exen.load(&model).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(exen.runtime().get_script("Hw").is_some());
        assert!(exen.runtime().get("Py").is_none());
        assert!(exen.runtime().get("After").is_none());
    }

    #[test]
    fn test_start_stop() {
        let exen = ExEn::new(Config::default());
        exen.start().unwrap();
        assert!(exen.bus().is_running());
        assert!(exen.start().is_err());
        exen.stop();
        assert!(!exen.bus().is_running());
    }
}
