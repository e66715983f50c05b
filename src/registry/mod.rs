//! Command registry.
//!
//! The [`Runtime`] owns every live Device, Driver, Script and Rule. Names are
//! unique across all four kinds. Admission checks prerequisites (a Device
//! needs its Driver, a Driver needs its Script) and then starts the command;
//! removal stops it and cascades to dependents.
//!
//! The table lock is never held while a command starts or stops, since both
//! call back into the registry.

mod command;
mod device;
mod lifecycle;
mod rule;
mod script;

pub use command::{Command, CommandKind};
pub use device::Device;
pub use lifecycle::{CommandState, Lifecycle};
pub use rule::Rule;
pub use script::Script;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::driver::Driver;
use crate::language::LanguageBuilder;
use crate::message::Message;
use crate::types::{Error, Result, Value};

#[derive(Default)]
struct Table {
    by_name: HashMap<String, Command>,
    /// Admission order.
    order: Vec<String>,
}

impl Table {
    fn insert(&mut self, command: Command) {
        self.order.push(command.name().to_string());
        self.by_name.insert(command.name().to_string(), command);
    }

    fn remove(&mut self, name: &str) -> Option<Command> {
        let command = self.by_name.remove(name)?;
        self.order.retain(|n| n != name);
        Some(command)
    }

    fn ordered(&self) -> impl Iterator<Item = &Command> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    /// Remove `command` only if the entry under its name is that instance.
    fn remove_if_same(&mut self, command: &Command) -> Option<Command> {
        let same = self
            .by_name
            .get(command.name())
            .is_some_and(|existing| existing.same_instance(command));
        if same {
            self.remove(command.name())
        } else {
            None
        }
    }

    /// Unique name and loaded prerequisites.
    fn admissible(&self, command: &Command) -> Result<()> {
        let name = command.name();
        if name.trim().is_empty() {
            return Err(Error::validation("command name must not be empty"));
        }

        if let Some(existing) = self.by_name.get(name) {
            return Err(Error::validation(format!(
                "name '{}' is already used by a {}",
                name,
                existing.kind()
            )));
        }

        let missing = match command {
            Command::Device(d) => self
                .by_name
                .get(d.driver_name())
                .and_then(Command::as_driver)
                .is_none()
                .then(|| format!("driver '{}'", d.driver_name())),
            Command::Driver(d) => self
                .by_name
                .get(d.script_name())
                .and_then(Command::as_script)
                .is_none()
                .then(|| format!("script '{}'", d.script_name())),
            Command::Script(_) | Command::Rule(_) => None,
        };
        match missing {
            Some(what) => Err(Error::validation(format!(
                "{} '{}' requires {}, which is not loaded",
                command.kind(),
                name,
                what
            ))),
            None => Ok(()),
        }
    }

    /// Commands that must leave together with `target`, dependents first.
    fn cascade(&self, target: &Command) -> Vec<Command> {
        let devices_of = |driver: &str| -> Vec<Command> {
            self.ordered()
                .filter(|c| c.as_device().is_some_and(|d| d.driver_name() == driver))
                .cloned()
                .collect()
        };

        let mut doomed = Vec::new();
        match target {
            Command::Script(script) => {
                let drivers: Vec<Command> = self
                    .ordered()
                    .filter(|c| c.as_driver().is_some_and(|d| d.script_name() == script.name()))
                    .cloned()
                    .collect();
                for driver in &drivers {
                    doomed.extend(devices_of(driver.name()));
                }
                doomed.extend(drivers);
            }
            Command::Driver(driver) => doomed.extend(devices_of(driver.name())),
            Command::Device(_) | Command::Rule(_) => {}
        }
        doomed.push(target.clone());
        doomed
    }
}

/// Facade over the live command graph, the bus and the languages.
pub struct Runtime {
    bus: EventBus,
    languages: Arc<LanguageBuilder>,
    table: RwLock<Table>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("commands", &self.table.read().order)
            .field("bus", &self.bus)
            .finish()
    }
}

impl Runtime {
    pub fn new(bus: EventBus, languages: Arc<LanguageBuilder>) -> Self {
        Self {
            bus,
            languages,
            table: RwLock::new(Table::default()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn languages(&self) -> &LanguageBuilder {
        &self.languages
    }

    pub fn post(&self, message: Message) -> Result<()> {
        self.bus.post(message)
    }

    pub fn post_delayed(&self, message: Message, delay: Duration) -> Result<()> {
        self.bus.post_delayed(message, delay)
    }

    // =========================================================================
    // Admission and removal
    // =========================================================================

    /// Admit and start a command. On any failure the command is not kept.
    pub fn add(&self, command: Command) -> Result<()> {
        {
            let mut table = self.table.write();
            if let Err(e) = table.admissible(&command) {
                tracing::error!(command = %command.name(), kind = %command.kind(), error = %e, "admission refused");
                return Err(e);
            }
            table.insert(command.clone());
        }

        if let Err(e) = command.start(self) {
            self.table.write().remove_if_same(&command);
            if let Err(stop_err) = command.stop() {
                tracing::debug!(command = %command.name(), error = %stop_err, "cleanup stop failed");
            }
            tracing::error!(command = %command.name(), kind = %command.kind(), error = %e, "start failed");
            return Err(e);
        }

        tracing::info!(command = %command.name(), kind = %command.kind(), "command added");
        Ok(())
    }

    /// Stop and remove a command and everything depending on it.
    ///
    /// Returns every removed command, dependents first. Nobody else is
    /// notified about the cascade.
    pub fn remove(&self, name: &str) -> Result<Vec<Command>> {
        let removed = {
            let mut table = self.table.write();
            let target = table
                .by_name
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("no command named '{}'", name)))?;
            let doomed = table.cascade(&target);
            for command in &doomed {
                table.remove(command.name());
            }
            doomed
        };

        for command in &removed {
            if let Err(e) = command.stop() {
                tracing::error!(command = %command.name(), error = %e, "stop failed");
            }
        }
        tracing::info!(command = %name, removed = removed.len(), "command removed");
        Ok(removed)
    }

    /// Remove everything: rules, devices, drivers, then scripts.
    pub fn clear(&self) -> Vec<Command> {
        let mut removed = Vec::new();
        for kind in [
            CommandKind::Rule,
            CommandKind::Device,
            CommandKind::Driver,
            CommandKind::Script,
        ] {
            for command in self.all(&[kind.as_str()]) {
                if let Ok(mut gone) = self.remove(command.name()) {
                    removed.append(&mut gone);
                }
            }
        }
        removed
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, name: &str) -> Option<Command> {
        if name.is_empty() {
            return None;
        }
        self.table.read().by_name.get(name).cloned()
    }

    pub fn get_device(&self, name: &str) -> Option<Arc<Device>> {
        self.get(name)?.as_device().cloned()
    }

    pub fn get_driver(&self, name: &str) -> Option<Arc<Driver>> {
        self.get(name)?.as_driver().cloned()
    }

    pub fn get_script(&self, name: &str) -> Option<Arc<Script>> {
        self.get(name)?.as_script().cloned()
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.get(name)?.as_rule().cloned()
    }

    /// Current value of a device. Errors when `name` is not a device.
    pub fn device_value(&self, name: &str) -> Result<Option<Value>> {
        match self.get(name) {
            Some(Command::Device(device)) => Ok(device.value()),
            Some(other) => Err(Error::validation(format!(
                "'{}' is a {}, not a device",
                name,
                other.kind()
            ))),
            None => Err(Error::not_found(format!("device '{}' does not exist", name))),
        }
    }

    /// Commands matching any of the type tokens, in admission order. An
    /// empty filter matches everything.
    pub fn all(&self, kinds: &[&str]) -> Vec<Command> {
        let wanted: Vec<CommandKind> = kinds
            .iter()
            .filter_map(|token| CommandKind::from_token(token))
            .collect();
        self.table
            .read()
            .ordered()
            .filter(|c| kinds.is_empty() || wanted.contains(&c.kind()))
            .cloned()
            .collect()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.table
            .read()
            .ordered()
            .filter_map(|c| c.as_device().cloned())
            .collect()
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.table
            .read()
            .ordered()
            .filter_map(|c| c.as_rule().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub fn is_name_of_group(&self, name: &str) -> bool {
        !name.is_empty() && self.devices().iter().any(|d| d.in_group(name))
    }

    /// Devices in any of `groups`, in admission order.
    pub fn get_members_of(&self, groups: &[&str]) -> Vec<Arc<Device>> {
        self.devices()
            .into_iter()
            .filter(|d| groups.iter().any(|g| d.in_group(g)))
            .collect()
    }

    pub fn get_in_any_group(&self, groups: &[&str]) -> Vec<Arc<Device>> {
        self.get_members_of(groups)
    }

    /// Devices in every one of `groups`. No groups yields nothing.
    pub fn get_in_all_groups(&self, groups: &[&str]) -> Vec<Arc<Device>> {
        if groups.is_empty() {
            return Vec::new();
        }
        self.devices()
            .into_iter()
            .filter(|d| groups.iter().all(|g| d.in_group(g)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ControllerCatalog;
    use crate::language::une::UneRuntime;
    use crate::language::{LanguageConstructor, LanguageRuntime, ScriptSource};
    use crate::types::{BusConfig, Config, LanguageConfig, NATIVE_IMPLEMENTATION};
    use pretty_assertions::assert_eq;

    fn runtime() -> Runtime {
        let builder = Arc::new(LanguageBuilder::new(Config::default().languages));
        let catalog = Arc::new(ControllerCatalog::with_builtins());
        let constructor: LanguageConstructor =
            Arc::new(move |_: &LanguageConfig| -> Result<Arc<dyn LanguageRuntime>> {
                Ok(Arc::new(UneRuntime::new(Arc::clone(&catalog))))
            });
        builder.register(NATIVE_IMPLEMENTATION, constructor);
        Runtime::new(EventBus::new(BusConfig::default()), builder)
    }

    fn controller_script(name: &str) -> Command {
        Command::Script(Arc::new(Script::new(
            name,
            "une",
            ScriptSource::Code(r#"{"controller": "virtual"}"#.into()),
            None,
        )))
    }

    fn driver(name: &str, script: &str) -> Command {
        Command::Driver(Arc::new(Driver::new(name, script)))
    }

    fn device(name: &str, driver: &str, groups: &[&str]) -> Command {
        Command::Device(Arc::new(Device::new(
            name,
            driver,
            serde_json::Value::Null,
            groups.iter().map(|g| g.to_string()).collect(),
        )))
    }

    fn names(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::name).collect()
    }

    fn loaded() -> Runtime {
        let rt = runtime();
        rt.add(controller_script("S1")).unwrap();
        rt.add(driver("Drv", "S1")).unwrap();
        rt.add(device("Lamp", "Drv", &["Kitchen", "Lights"])).unwrap();
        rt.add(device("Oven", "Drv", &["kitchen"])).unwrap();
        rt.add(device("Porch", "Drv", &["lights"])).unwrap();
        rt
    }

    #[test]
    fn test_device_without_driver_is_refused() {
        let rt = runtime();
        let err = rt.add(device("D1", "Missing", &[])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(rt.get("D1").is_none());
    }

    #[test]
    fn test_driver_needs_a_script_not_just_a_name() {
        let rt = runtime();
        rt.add(controller_script("S1")).unwrap();
        rt.add(driver("Drv", "S1")).unwrap();
        assert!(rt.add(driver("Drv2", "Drv")).is_err());
        assert!(rt.get_driver("Drv").is_some());
    }

    #[test]
    fn test_names_are_unique_across_kinds() {
        let rt = loaded();
        let rule = Rule::new("Lamp", None, "une", ScriptSource::Code("[]".into())).unwrap();
        assert!(rt.add(Command::Rule(Arc::new(rule))).is_err());
        assert!(rt.get_device("Lamp").is_some());
        assert!(rt.get("").is_none());
        assert!(rt.add(controller_script("")).is_err());
    }

    #[test]
    fn test_concurrent_admission_keeps_one_command_per_name() {
        use std::sync::Barrier;

        let rt = Arc::new(runtime());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rt = Arc::clone(&rt);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let rule = Rule::new("Shared", None, "une", ScriptSource::Code("[]".into()))
                        .unwrap();
                    barrier.wait();
                    rt.add(Command::Rule(Arc::new(rule))).is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(rt.len(), 1);
        assert_eq!(names(&rt.all(&[])), vec!["Shared"]);
    }

    #[test]
    fn test_device_cannot_outlive_a_concurrently_removed_driver() {
        use std::sync::Barrier;

        for _ in 0..20 {
            let rt = Arc::new(runtime());
            rt.add(controller_script("S1")).unwrap();
            rt.add(driver("Drv", "S1")).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let adder = {
                let rt = Arc::clone(&rt);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let _ = rt.add(device("Late", "Drv", &[]));
                })
            };
            barrier.wait();
            rt.remove("Drv").unwrap();
            adder.join().unwrap();

            // either refused, or admitted and then cascaded away
            assert!(rt.get_driver("Drv").is_none());
            assert!(rt.get_device("Late").is_none());
        }
    }

    #[test]
    fn test_failed_start_is_not_kept() {
        let rt = runtime();
        let script = Script::new("Broken", "une", ScriptSource::Code("[oops".into()), None);
        let err = rt.add(Command::Script(Arc::new(script))).unwrap_err();
        assert!(matches!(err, Error::Prepare { .. }));
        assert!(rt.get("Broken").is_none());

        let script = Script::new("Py", "python", ScriptSource::Code(String::new()), None);
        assert!(matches!(
            rt.add(Command::Script(Arc::new(script))),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_all_filters_by_kind_tokens() {
        let rt = loaded();
        assert_eq!(rt.all(&[]).len(), 5);
        assert_eq!(names(&rt.all(&["Devices"])), vec!["Lamp", "Oven", "Porch"]);
        assert_eq!(names(&rt.all(&["script", "DRIVERS"])), vec!["S1", "Drv"]);
        assert!(rt.all(&["widgets"]).is_empty());
    }

    #[test]
    fn test_group_queries() {
        let rt = loaded();
        let device_names = |devices: Vec<Arc<Device>>| -> Vec<String> {
            devices.iter().map(|d| d.name().to_string()).collect()
        };

        assert!(rt.is_name_of_group("KITCHEN"));
        assert!(!rt.is_name_of_group("garage"));
        assert_eq!(
            device_names(rt.get_members_of(&["lights", "kitchen"])),
            vec!["Lamp", "Oven", "Porch"]
        );
        assert_eq!(
            device_names(rt.get_in_any_group(&["Lights"])),
            vec!["Lamp", "Porch"]
        );
        assert_eq!(
            device_names(rt.get_in_all_groups(&["kitchen", "lights"])),
            vec!["Lamp"]
        );
        assert!(rt.get_members_of(&["garage"]).is_empty());
        assert!(rt.get_in_all_groups(&[]).is_empty());
    }

    #[test]
    fn test_removing_script_cascades() {
        let rt = loaded();
        let lamp = rt.get_device("Lamp").unwrap();
        let removed = rt.remove("S1").unwrap();

        assert_eq!(names(&removed), vec!["Lamp", "Oven", "Porch", "Drv", "S1"]);
        assert!(rt.is_empty());
        assert_eq!(lamp.lifecycle().state(), CommandState::Stopped);
        assert!(matches!(rt.remove("S1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_removing_device_keeps_driver() {
        let rt = loaded();
        let drv = rt.get_driver("Drv").unwrap();
        assert_eq!(drv.devices(), vec!["Lamp", "Oven", "Porch"]);

        let removed = rt.remove("Oven").unwrap();
        assert_eq!(names(&removed), vec!["Oven"]);
        assert_eq!(drv.devices(), vec!["Lamp", "Porch"]);
        assert!(drv.lifecycle().is_started());
    }

    #[test]
    fn test_device_value_lookup() {
        let rt = loaded();
        assert_eq!(rt.device_value("Lamp").unwrap(), None);
        rt.get_device("Lamp").unwrap().update(Value::Bool(true));
        assert_eq!(rt.device_value("Lamp").unwrap(), Some(Value::Bool(true)));
        assert!(matches!(rt.device_value("Drv"), Err(Error::Validation(_))));
        assert!(matches!(rt.device_value("Ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_clear_stops_everything() {
        let rt = loaded();
        let removed = rt.clear();
        assert_eq!(removed.len(), 5);
        assert!(rt.is_empty());
    }
}
