//! Drivers bind devices to controllers.
//!
//! One [`Driver`] exists per driver name. It owns every controller serving
//! its devices and a single [`DriverListener`] shared by all of them, which
//! turns controller observations into `DeviceReaded` messages.
//!
//! Devices added before the driver starts are held as [`Binding::Pending`]
//! and resolved in `start`. Devices configured with equal, non-empty init
//! data share one controller instance.

pub mod controller;

pub use controller::{
    Controller, ControllerCatalog, ControllerConstructor, ControllerListener, Severity,
    VirtualController,
};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::bus::EventBus;
use crate::message::Message;
use crate::recovery::with_recovery;
use crate::registry::{Device, Lifecycle, Runtime};
use crate::types::{Error, Result, Value};

/// Turns controller callbacks into bus messages.
#[derive(Debug)]
pub struct DriverListener {
    driver: String,
    bus: EventBus,
}

impl DriverListener {
    pub fn new(driver: impl Into<String>, bus: EventBus) -> Self {
        Self {
            driver: driver.into(),
            bus,
        }
    }
}

impl ControllerListener for DriverListener {
    fn on_changed(&self, device: &str, value: Option<Value>) {
        match value {
            Some(value) if !device.is_empty() => {
                if let Err(e) = self.bus.post(Message::device_readed(device, value, true)) {
                    tracing::error!(driver = %self.driver, device, error = %e, "reading dropped");
                }
            }
            _ => tracing::error!(
                driver = %self.driver,
                device,
                "controller reported a change without device name or value"
            ),
        }
    }

    fn on_error(&self, level: Severity, message: &str, device: Option<&str>) {
        let device = device.unwrap_or("-");
        match level {
            Severity::Debug => tracing::debug!(driver = %self.driver, device, "{}", message),
            Severity::Info => tracing::info!(driver = %self.driver, device, "{}", message),
            Severity::Warning => tracing::warn!(driver = %self.driver, device, "{}", message),
            Severity::Severe => tracing::error!(driver = %self.driver, device, "{}", message),
        }
    }
}

/// A device's entry in its driver.
#[derive(Debug, Clone)]
pub enum Binding {
    /// Added before the driver started.
    Pending(Arc<Device>),
    Live {
        device: Arc<Device>,
        controller: Arc<dyn Controller>,
    },
}

impl Binding {
    pub fn device(&self) -> &Arc<Device> {
        match self {
            Binding::Pending(device) | Binding::Live { device, .. } => device,
        }
    }

    pub fn controller(&self) -> Option<&Arc<dyn Controller>> {
        match self {
            Binding::Pending(_) => None,
            Binding::Live { controller, .. } => Some(controller),
        }
    }
}

/// Init data eligible for controller sharing.
fn shareable(init: &serde_json::Value) -> bool {
    match init {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn same_controller(a: &Arc<dyn Controller>, b: &Arc<dyn Controller>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Debug)]
pub struct Driver {
    name: String,
    script_name: String,
    lifecycle: Lifecycle,
    listener: OnceLock<Arc<DriverListener>>,
    bindings: RwLock<HashMap<String, Binding>>,
}

impl Driver {
    pub fn new(name: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script_name: script_name.into(),
            lifecycle: Lifecycle::default(),
            listener: OnceLock::new(),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn binding(&self, device: &str) -> Option<Binding> {
        self.bindings.read().get(device).cloned()
    }

    /// Names of every device with an entry, sorted.
    pub fn devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every distinct live controller.
    pub fn controllers(&self) -> Vec<Arc<dyn Controller>> {
        let mut distinct: Vec<Arc<dyn Controller>> = Vec::new();
        for binding in self.bindings.read().values() {
            if let Some(controller) = binding.controller() {
                if !distinct.iter().any(|c| same_controller(c, controller)) {
                    distinct.push(Arc::clone(controller));
                }
            }
        }
        distinct
    }

    fn listener(&self, runtime: &Runtime) -> Arc<DriverListener> {
        Arc::clone(
            self.listener
                .get_or_init(|| Arc::new(DriverListener::new(&self.name, runtime.bus().clone()))),
        )
    }

    /// Find or create the controller for `device`. The flag is true when the
    /// controller is new and still needs `start`.
    fn resolve(&self, device: &Device, runtime: &Runtime) -> Result<(Arc<dyn Controller>, bool)> {
        let listener: Arc<dyn ControllerListener> = self.listener(runtime);
        let init = device.init();

        if shareable(init) {
            let existing = self.bindings.read().values().find_map(|binding| match binding {
                Binding::Live {
                    device: other,
                    controller,
                } if other.init() == init => Some(Arc::clone(controller)),
                _ => None,
            });
            if let Some(controller) = existing {
                self.configure(&controller, device, listener)?;
                tracing::debug!(driver = %self.name, device = %device.name(), "controller shared");
                return Ok((controller, false));
            }
        }

        let script = runtime.get_script(&self.script_name).ok_or_else(|| {
            Error::not_found(format!(
                "script '{}' of driver '{}' is not loaded",
                self.script_name, self.name
            ))
        })?;
        let controller: Arc<dyn Controller> = Arc::from(script.new_controller()?);
        self.configure(&controller, device, listener)?;
        Ok((controller, true))
    }

    fn configure(
        &self,
        controller: &Arc<dyn Controller>,
        device: &Device,
        listener: Arc<dyn ControllerListener>,
    ) -> Result<()> {
        with_recovery(
            || controller.set(device.name(), device.init(), listener),
            "controller.set",
        )?;
        if !controller.is_valid() {
            return Err(Error::validation(format!(
                "controller for device '{}' is not valid after set",
                device.name()
            )));
        }
        Ok(())
    }

    fn start_controller(&self, controller: &Arc<dyn Controller>, runtime: &Runtime) {
        if let Err(e) = with_recovery(|| controller.start(runtime), "controller.start") {
            tracing::error!(driver = %self.name, error = %e, "controller failed to start");
        }
    }

    fn stop_controller(&self, controller: &Arc<dyn Controller>) {
        let stopped = with_recovery(
            || {
                controller.stop();
                Ok(())
            },
            "controller.stop",
        );
        if let Err(e) = stopped {
            tracing::error!(driver = %self.name, error = %e, "controller failed to stop");
        }
    }

    /// Resolve pending devices, then start every distinct controller.
    ///
    /// A device whose controller cannot be created or is invalid is dropped.
    pub fn start(&self, runtime: &Runtime) -> Result<()> {
        self.lifecycle.start(&self.name)?;
        self.listener(runtime);

        let mut pending: Vec<Arc<Device>> = self
            .bindings
            .read()
            .values()
            .filter_map(|binding| match binding {
                Binding::Pending(device) => Some(Arc::clone(device)),
                Binding::Live { .. } => None,
            })
            .collect();
        pending.sort_by(|a, b| a.name().cmp(b.name()));

        for device in pending {
            match self.resolve(&device, runtime) {
                Ok((controller, _)) => {
                    self.bindings.write().insert(
                        device.name().to_string(),
                        Binding::Live { device, controller },
                    );
                }
                Err(e) => {
                    tracing::error!(
                        driver = %self.name,
                        device = %device.name(),
                        error = %e,
                        "device dropped: no usable controller"
                    );
                    self.bindings.write().remove(device.name());
                }
            }
        }

        let controllers = self.controllers();
        for controller in &controllers {
            self.start_controller(controller, runtime);
        }
        tracing::info!(
            driver = %self.name,
            devices = self.bindings.read().len(),
            controllers = controllers.len(),
            "driver started"
        );
        Ok(())
    }

    /// Stop every distinct controller and forget all bindings.
    pub fn stop(&self) -> Result<()> {
        self.lifecycle.stop(&self.name)?;
        for controller in self.controllers() {
            self.stop_controller(&controller);
        }
        self.bindings.write().clear();
        tracing::info!(driver = %self.name, "driver stopped");
        Ok(())
    }

    /// Bind a device: immediately when started, deferred otherwise.
    pub fn add(&self, device: Arc<Device>, runtime: &Runtime) -> Result<()> {
        let name = device.name().to_string();
        if self.lifecycle.is_started() {
            let (controller, fresh) = self.resolve(&device, runtime)?;
            self.bindings.write().insert(
                name,
                Binding::Live {
                    device,
                    controller: Arc::clone(&controller),
                },
            );
            if fresh {
                self.start_controller(&controller, runtime);
            }
        } else if self.lifecycle.state() == crate::registry::CommandState::Created {
            self.bindings.write().insert(name, Binding::Pending(device));
        } else {
            return Err(Error::state_transition(format!(
                "driver '{}' is stopped",
                self.name
            )));
        }
        Ok(())
    }

    /// Stop the device and drop its entry. A controller still serving other
    /// devices keeps running. Unlike a plain "never stop on remove" contract,
    /// a controller left without any device is stopped here so its hardware
    /// handles are released.
    pub fn remove(&self, device: &Device) -> Result<()> {
        let orphan = {
            let mut bindings = self.bindings.write();
            match bindings.remove(device.name()) {
                Some(Binding::Live { controller, .. })
                    if !bindings.values().any(|b| {
                        b.controller().is_some_and(|c| same_controller(c, &controller))
                    }) =>
                {
                    Some(controller)
                }
                _ => None,
            }
        };
        if let Some(controller) = orphan {
            self.stop_controller(&controller);
        }
        device.stop()
    }

    fn live_controller(&self, device: &str) -> Result<Arc<dyn Controller>> {
        match self.bindings.read().get(device) {
            Some(Binding::Live { controller, .. }) => Ok(Arc::clone(controller)),
            Some(Binding::Pending(_)) => Err(Error::state_transition(format!(
                "device '{}' has no controller yet",
                device
            ))),
            None => Err(Error::not_found(format!(
                "device '{}' is not bound to driver '{}'",
                device, self.name
            ))),
        }
    }

    /// Ask the device's controller for a fresh reading. Failures are logged.
    pub fn read(&self, device: &str) {
        let result = self
            .live_controller(device)
            .and_then(|controller| with_recovery(|| controller.read(), "controller.read"));
        if let Err(e) = result {
            tracing::error!(driver = %self.name, device, error = %e, "read failed");
        }
    }

    /// Forward a value to the device's controller. Failures are logged.
    pub fn write(&self, device: &str, value: &Value) {
        let result = self
            .live_controller(device)
            .and_then(|controller| with_recovery(|| controller.write(value), "controller.write"));
        if let Err(e) = result {
            tracing::error!(driver = %self.name, device, value = %value, error = %e, "write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::language::{LanguageBuilder, LanguageRuntime, Prepared, ScriptSource};
    use crate::registry::{Command, Script};
    use crate::types::{BusConfig, InvokerUid, LanguageConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts lifecycle calls; invalid when init carries `"broken"` or once
    /// device `Poison` is set. Setting device `Exploding` panics.
    #[derive(Debug, Default)]
    struct Probe {
        devices: Mutex<Vec<String>>,
        broken: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        writes: Mutex<Vec<Value>>,
    }

    impl Controller for Probe {
        fn set(
            &self,
            device: &str,
            init: &serde_json::Value,
            _listener: Arc<dyn ControllerListener>,
        ) -> Result<()> {
            if device == "Exploding" {
                panic!("bus fault while configuring {}", device);
            }
            if init.get("broken").is_some() || device == "Poison" {
                self.broken.store(true, Ordering::SeqCst);
            }
            self.devices.lock().push(device.to_string());
            Ok(())
        }

        fn read(&self) -> Result<()> {
            Err(Error::internal("sensor offline"))
        }

        fn write(&self, value: &Value) -> Result<()> {
            self.writes.lock().push(value.clone());
            Ok(())
        }

        fn start(&self, _runtime: &Runtime) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_valid(&self) -> bool {
            !self.broken.load(Ordering::SeqCst)
        }
    }

    /// Language whose every program builds a fresh [`Probe`].
    #[derive(Debug, Default)]
    struct ProbeLanguage {
        built: Mutex<Vec<Arc<Probe>>>,
    }

    #[derive(Debug)]
    struct SharedProbe(Arc<Probe>);

    impl Controller for SharedProbe {
        fn set(&self, d: &str, i: &serde_json::Value, l: Arc<dyn ControllerListener>) -> Result<()> {
            self.0.set(d, i, l)
        }
        fn read(&self) -> Result<()> {
            self.0.read()
        }
        fn write(&self, v: &Value) -> Result<()> {
            self.0.write(v)
        }
        fn start(&self, r: &Runtime) -> Result<()> {
            self.0.start(r)
        }
        fn stop(&self) {
            self.0.stop()
        }
        fn is_valid(&self) -> bool {
            self.0.is_valid()
        }
    }

    impl LanguageRuntime for ProbeLanguage {
        fn name(&self) -> &str {
            "probe"
        }

        fn prepare(&self, _source: &ScriptSource, call: Option<&str>) -> Result<Prepared> {
            Ok(Prepared::compiled(Box::new(()), call.map(String::from)))
        }

        fn bind(&self, _invoker: &InvokerUid, _prepared: Prepared) -> Result<()> {
            Ok(())
        }

        fn execute(&self, _invoker: &InvokerUid, _runtime: &Runtime) -> Result<()> {
            Ok(())
        }

        fn new_controller(&self, _invoker: &InvokerUid) -> Result<Box<dyn Controller>> {
            let probe = Arc::new(Probe::default());
            self.built.lock().push(Arc::clone(&probe));
            Ok(Box::new(SharedProbe(probe)))
        }

        fn unbind(&self, _invoker: &InvokerUid) -> bool {
            true
        }
    }

    fn setup() -> (Arc<Runtime>, Arc<ProbeLanguage>, Arc<Driver>) {
        let mut table = HashMap::new();
        table.insert(
            "probe".to_string(),
            LanguageConfig {
                implementation: "probe".to_string(),
                uris: Vec::new(),
            },
        );
        let builder = Arc::new(LanguageBuilder::new(table));
        let language = Arc::new(ProbeLanguage::default());
        let handle = Arc::clone(&language);
        builder.register(
            "probe",
            Arc::new(move |_: &LanguageConfig| -> Result<Arc<dyn LanguageRuntime>> {
                Ok(Arc::clone(&handle) as Arc<dyn LanguageRuntime>)
            }),
        );

        let runtime = Arc::new(Runtime::new(EventBus::new(BusConfig::default()), builder));
        runtime
            .add(Command::Script(Arc::new(Script::new(
                "S1",
                "probe",
                ScriptSource::Code(String::new()),
                None,
            ))))
            .unwrap();
        let driver = Arc::new(Driver::new("Drv", "S1"));
        (runtime, language, driver)
    }

    fn device(name: &str, init: serde_json::Value) -> Arc<Device> {
        Arc::new(Device::new(name, "Drv", init, Vec::new()))
    }

    #[test]
    fn test_pending_devices_resolve_on_start() {
        let (runtime, language, driver) = setup();
        driver.add(device("D1", serde_json::Value::Null), &runtime).unwrap();
        driver.add(device("D2", serde_json::Value::Null), &runtime).unwrap();
        assert!(driver.binding("D1").unwrap().controller().is_none());
        assert!(language.built.lock().is_empty());

        driver.start(&runtime).unwrap();
        assert!(driver.binding("D1").unwrap().controller().is_some());
        // null init never shares
        assert_eq!(driver.controllers().len(), 2);
        for probe in language.built.lock().iter() {
            assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_equal_init_shares_one_controller() {
        let (runtime, language, driver) = setup();
        let init = serde_json::json!({"port": "/dev/ttyUSB0"});
        let d1 = device("D1", init.clone());
        let d2 = device("D2", init);
        driver.add(Arc::clone(&d1), &runtime).unwrap();
        driver.add(Arc::clone(&d2), &runtime).unwrap();
        driver.start(&runtime).unwrap();

        let c1 = driver.binding("D1").unwrap().controller().cloned().unwrap();
        let c2 = driver.binding("D2").unwrap().controller().cloned().unwrap();
        assert!(same_controller(&c1, &c2));
        assert_eq!(language.built.lock().len(), 1);

        let probe = Arc::clone(&language.built.lock()[0]);
        assert_eq!(*probe.devices.lock(), vec!["D1", "D2"]);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);

        d1.lifecycle().start("D1").unwrap();
        driver.remove(&d1).unwrap();
        assert!(driver.binding("D1").is_none());
        assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
        driver.write("D2", &Value::Int(3));
        assert_eq!(*probe.writes.lock(), vec![Value::Int(3)]);

        driver.stop().unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert!(driver.devices().is_empty());
    }

    #[test]
    fn test_controller_stops_when_its_last_device_leaves() {
        let (runtime, language, driver) = setup();
        let init = serde_json::json!({"port": "/dev/ttyS2"});
        let d1 = device("D1", init.clone());
        let d2 = device("D2", init);
        driver.add(Arc::clone(&d1), &runtime).unwrap();
        driver.add(Arc::clone(&d2), &runtime).unwrap();
        driver.start(&runtime).unwrap();
        let probe = Arc::clone(&language.built.lock()[0]);

        d1.lifecycle().start("D1").unwrap();
        d2.lifecycle().start("D2").unwrap();
        driver.remove(&d1).unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
        driver.remove(&d2).unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_controller_drops_only_that_device() {
        let (runtime, _language, driver) = setup();
        driver
            .add(device("Bad", serde_json::json!({"broken": true})), &runtime)
            .unwrap();
        driver.add(device("Good", serde_json::Value::Null), &runtime).unwrap();
        driver.start(&runtime).unwrap();

        assert_eq!(driver.devices(), vec!["Good"]);
    }

    #[test]
    fn test_shared_controller_is_set_and_validated_like_a_fresh_one() {
        let (runtime, language, driver) = setup();
        let init = serde_json::json!({"port": "/dev/ttyS1"});
        driver.add(device("D1", init.clone()), &runtime).unwrap();
        driver.start(&runtime).unwrap();

        let err = driver.add(device("Exploding", init.clone()), &runtime);
        assert!(matches!(err, Err(Error::Internal(_))));
        assert!(driver.binding("Exploding").is_none());

        let err = driver.add(device("Poison", init), &runtime);
        assert!(matches!(err, Err(Error::Validation(_))));
        assert!(driver.binding("Poison").is_none());

        assert_eq!(language.built.lock().len(), 1);
        assert_eq!(driver.devices(), vec!["D1"]);
    }

    #[test]
    fn test_add_after_start_resolves_immediately() {
        let (runtime, language, driver) = setup();
        driver.start(&runtime).unwrap();
        driver.add(device("Late", serde_json::Value::Null), &runtime).unwrap();

        assert!(driver.binding("Late").unwrap().controller().is_some());
        assert_eq!(language.built.lock()[0].starts.load(Ordering::SeqCst), 1);

        let err = driver.add(device("Bad", serde_json::json!({"broken": 1})), &runtime);
        assert!(matches!(err, Err(Error::Validation(_))));
        assert!(driver.binding("Bad").is_none());
    }

    #[test]
    fn test_read_and_write_failures_are_contained() {
        let (runtime, _language, driver) = setup();
        driver.add(device("D1", serde_json::Value::Null), &runtime).unwrap();
        driver.start(&runtime).unwrap();

        // controller error, unknown device: logged only
        driver.read("D1");
        driver.write("Ghost", &Value::Bool(true));

        driver.stop().unwrap();
        assert!(driver.add(device("D3", serde_json::Value::Null), &runtime).is_err());
    }

    #[tokio::test]
    async fn test_listener_posts_readings_only_with_name_and_value() {
        let bus = EventBus::new(BusConfig::default());
        let listener = DriverListener::new("Drv", bus.clone());

        listener.on_changed("D1", Some(Value::Int(7)));
        listener.on_changed("D1", None);
        listener.on_changed("", Some(Value::Int(1)));
        listener.on_error(Severity::Warning, "checksum mismatch", Some("D1"));

        assert_eq!(bus.get_pending(), 1);
    }
}
