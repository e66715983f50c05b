//! Core reaction loop.
//!
//! The [`Dispatcher`] is the bus listener that closes the data flow:
//!
//! ```text
//!   DeviceReaded ──► reconcile into Device ──► DeviceChanged ──► dependent Rules
//!   Trigger / Execute ──► Script run | Rule fire
//!   ChangeActuator ──► Driver::write      ReadDevice ──► Driver::read
//! ```
//!
//! Every failure is isolated to the message that caused it and logged.

use std::sync::{Arc, Weak};

use crate::bus::MessageListener;
use crate::message::{Message, Payload};
use crate::recovery::with_recovery;
use crate::registry::{Command, Runtime};
use crate::types::{Result, Value};

#[derive(Debug)]
pub struct Dispatcher {
    runtime: Weak<Runtime>,
}

impl Dispatcher {
    pub fn new(runtime: &Arc<Runtime>) -> Self {
        Self {
            runtime: Arc::downgrade(runtime),
        }
    }

    fn reconcile(&self, runtime: &Runtime, name: &str, value: &Value, is_own: bool) {
        let Some(device) = runtime.get_device(name) else {
            tracing::warn!(device = %name, "reading for unknown device");
            return;
        };
        if !device.update(value.clone()) {
            tracing::trace!(device = %name, value = %value, "reading unchanged");
            return;
        }
        if let Err(e) = runtime.post(Message::device_changed(name, value.clone(), is_own)) {
            tracing::error!(device = %name, error = %e, "change not posted");
        }
    }

    fn changed(&self, runtime: &Runtime, name: &str, value: &Value, is_own: bool) {
        if !is_own {
            if let Some(device) = runtime.get_device(name) {
                device.update(value.clone());
            }
        }

        for rule in runtime.rules().into_iter().filter(|r| r.depends_on(name)) {
            match with_recovery(|| rule.fire(runtime, false), "rule.fire") {
                Ok(true) => tracing::debug!(rule = %rule.name(), device = %name, "rule fired"),
                Ok(false) => {}
                Err(e) => tracing::error!(rule = %rule.name(), device = %name, error = %e, "rule firing aborted"),
            }
        }
    }

    fn run(&self, runtime: &Runtime, name: &str, force: bool) {
        let result = match runtime.get(name) {
            Some(Command::Script(script)) => with_recovery(|| script.run(runtime), "script.run"),
            Some(Command::Rule(rule)) => {
                with_recovery(|| rule.fire(runtime, force), "rule.fire").map(|_| ())
            }
            Some(other) => {
                tracing::warn!(target_name = %name, kind = %other.kind(), "only scripts and rules can run");
                return;
            }
            None => {
                tracing::warn!(target_name = %name, "nothing to run under that name");
                return;
            }
        };
        if let Err(e) = result {
            tracing::error!(target_name = %name, error = %e, "firing aborted");
        }
    }

    fn with_driver(&self, runtime: &Runtime, device: &str, f: impl FnOnce(&crate::driver::Driver)) {
        match runtime.get_device(device).and_then(|d| d.driver()) {
            Some(driver) => f(&driver),
            None => tracing::error!(device, "no driver serves this device"),
        }
    }
}

impl MessageListener for Dispatcher {
    fn on_message(&self, message: &Message) -> Result<()> {
        let Some(runtime) = self.runtime.upgrade() else {
            return Ok(());
        };

        match &message.payload {
            Payload::DeviceReaded {
                name,
                value,
                is_own,
            } => self.reconcile(&runtime, name, value, *is_own),
            Payload::DeviceChanged {
                name,
                value,
                is_own,
            } => self.changed(&runtime, name, value, *is_own),
            Payload::Trigger { name, force } | Payload::Execute { name, force, .. } => {
                self.run(&runtime, name, *force)
            }
            Payload::ChangeActuator { name, value } => {
                self.with_driver(&runtime, name, |driver| driver.write(name, value))
            }
            Payload::ReadDevice { name } => {
                self.with_driver(&runtime, name, |driver| driver.read(name))
            }
            Payload::Error { message, device } => tracing::error!(
                device = device.as_deref().unwrap_or("-"),
                "{}",
                message
            ),
        }
        Ok(())
    }
}
