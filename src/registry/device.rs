use parking_lot::RwLock;
use std::sync::{Arc, OnceLock, Weak};

use super::{Lifecycle, Runtime};
use crate::driver::Driver;
use crate::types::{Error, Result, Value};

/// Virtual twin of a sensor or actuator.
///
/// The value is `None` until the first reading is reconciled.
#[derive(Debug)]
pub struct Device {
    name: String,
    driver_name: String,
    init: serde_json::Value,
    groups: Vec<String>,
    value: RwLock<Option<Value>>,
    lifecycle: Lifecycle,
    driver: OnceLock<Weak<Driver>>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        driver_name: impl Into<String>,
        init: serde_json::Value,
        groups: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            init,
            groups,
            value: RwLock::new(None),
            lifecycle: Lifecycle::default(),
            driver: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Parameters handed to the controller's `set`.
    pub fn init(&self) -> &serde_json::Value {
        &self.init
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn value(&self) -> Option<Value> {
        self.value.read().clone()
    }

    /// Store `value`; returns whether it differs from the current one.
    pub fn update(&self, value: Value) -> bool {
        let mut current = self.value.write();
        if current.as_ref().is_some_and(|old| old.same_as(&value)) {
            return false;
        }
        *current = Some(value);
        true
    }

    /// The driver this device was bound to, while it is alive.
    pub fn driver(&self) -> Option<Arc<Driver>> {
        self.driver.get().and_then(Weak::upgrade)
    }

    pub fn start(self: &Arc<Self>, runtime: &Runtime) -> Result<()> {
        self.lifecycle.start(&self.name)?;
        let driver = runtime.get_driver(&self.driver_name).ok_or_else(|| {
            Error::not_found(format!(
                "driver '{}' of device '{}' is not loaded",
                self.driver_name, self.name
            ))
        })?;
        let _ = self.driver.set(Arc::downgrade(&driver));
        driver.add(Arc::clone(self), runtime)
    }

    pub fn stop(&self) -> Result<()> {
        self.lifecycle.stop(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_reports_changes_only() {
        let device = Device::new("Temp", "Drv", serde_json::Value::Null, Vec::new());
        assert_eq!(device.value(), None);
        assert!(device.update(Value::Int(20)));
        assert!(!device.update(Value::Float(20.0)));
        assert!(device.update(Value::Float(20.5)));
        assert_eq!(device.value(), Some(Value::Float(20.5)));
    }

    #[test]
    fn test_groups_match_case_insensitively() {
        let device = Device::new(
            "Lamp",
            "Drv",
            serde_json::Value::Null,
            vec!["Kitchen".into(), "lights".into()],
        );
        assert!(device.in_group("kitchen"));
        assert!(device.in_group("LIGHTS"));
        assert!(!device.in_group("garden"));
    }
}
