//! Controller contract and the built-in catalog.
//!
//! Controllers adapt one hardware or protocol endpoint. They are created and
//! owned by a [`Driver`](super::Driver); nothing else calls them directly.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::registry::Runtime;
use crate::types::{Error, Result, Value};

/// Severity reported through [`ControllerListener::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Severe,
}

/// Callbacks a controller uses to report observations.
pub trait ControllerListener: Send + Sync + fmt::Debug {
    /// A device value was observed. `None` means the reading had no value.
    fn on_changed(&self, device: &str, value: Option<Value>);

    fn on_error(&self, level: Severity, message: &str, device: Option<&str>);
}

/// Hardware or protocol adapter.
pub trait Controller: Send + Sync + fmt::Debug {
    /// Configure for one device. Called before `start`, possibly once per
    /// device when a controller is shared.
    fn set(
        &self,
        device: &str,
        init: &serde_json::Value,
        listener: Arc<dyn ControllerListener>,
    ) -> Result<()>;

    /// Request a fresh reading, reported through the listener.
    fn read(&self) -> Result<()>;

    fn write(&self, value: &Value) -> Result<()>;

    fn start(&self, runtime: &Runtime) -> Result<()>;

    fn stop(&self);

    /// Whether `set` left the controller usable.
    fn is_valid(&self) -> bool;
}

pub type ControllerConstructor = Arc<dyn Fn() -> Box<dyn Controller> + Send + Sync>;

/// Name → constructor map for controllers languages can instantiate.
pub struct ControllerCatalog {
    constructors: RwLock<HashMap<String, ControllerConstructor>>,
}

impl fmt::Debug for ControllerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("ControllerCatalog")
            .field("controllers", &names)
            .finish()
    }
}

impl Default for ControllerCatalog {
    fn default() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }
}

impl ControllerCatalog {
    /// Catalog holding the `virtual` controller.
    pub fn with_builtins() -> Self {
        let catalog = Self::default();
        catalog.register(VirtualController::NAME, Arc::new(|| {
            Box::new(VirtualController::default()) as Box<dyn Controller>
        }));
        catalog
    }

    pub fn register(&self, name: impl Into<String>, constructor: ControllerConstructor) {
        let name = name.into().to_lowercase();
        tracing::debug!(controller = %name, "controller registered");
        self.constructors.write().insert(name, constructor);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Controller>> {
        let constructor = self
            .constructors
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("controller '{}' is not registered", name)))?;
        Ok(constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.read().keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    devices: Vec<String>,
    initial: Option<Value>,
    last: Option<Value>,
    listener: Option<Arc<dyn ControllerListener>>,
    running: bool,
}

/// Simulated hardware: writes come back as readings.
///
/// Init data may carry `{"initial": <value>}`, emitted once on start.
#[derive(Debug, Default)]
pub struct VirtualController {
    state: Mutex<VirtualState>,
}

impl VirtualController {
    pub const NAME: &'static str = "virtual";

    /// Report `value` for every configured device, outside the state lock.
    fn emit(&self, value: Option<Value>) {
        let (listener, devices) = {
            let state = self.state.lock();
            (state.listener.clone(), state.devices.clone())
        };
        if let Some(listener) = listener {
            for device in &devices {
                listener.on_changed(device, value.clone());
            }
        }
    }
}

impl Controller for VirtualController {
    fn set(
        &self,
        device: &str,
        init: &serde_json::Value,
        listener: Arc<dyn ControllerListener>,
    ) -> Result<()> {
        let initial = match init.get("initial") {
            Some(initial) => Some(serde_json::from_value::<Value>(initial.clone())?),
            None => None,
        };
        let mut state = self.state.lock();
        if initial.is_some() {
            state.initial = initial;
        }
        if !state.devices.iter().any(|d| d == device) {
            state.devices.push(device.to_string());
        }
        state.listener = Some(listener);
        Ok(())
    }

    fn read(&self) -> Result<()> {
        let last = self.state.lock().last.clone();
        self.emit(last);
        Ok(())
    }

    fn write(&self, value: &Value) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.running {
                return Err(Error::state_transition("virtual controller is not running"));
            }
            state.last = Some(value.clone());
        }
        self.emit(Some(value.clone()));
        Ok(())
    }

    fn start(&self, _runtime: &Runtime) -> Result<()> {
        let initial = {
            let mut state = self.state.lock();
            state.running = true;
            if state.last.is_none() {
                state.last = state.initial.clone();
            }
            state.last.clone()
        };
        if initial.is_some() {
            self.emit(initial);
        }
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().running = false;
    }

    fn is_valid(&self) -> bool {
        let state = self.state.lock();
        state.listener.is_some() && !state.devices.is_empty()
    }
}
