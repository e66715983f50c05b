//! Compiled model definitions.
//!
//! The external compiler turns source text into a JSON model; this module is
//! its serde shape. Conversion into live commands happens in
//! [`ExEn::load`](crate::exen::ExEn::load).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::driver::Driver;
use crate::language::ScriptSource;
use crate::registry::{Command, Device, Rule, Script};
use crate::types::{Result, NATIVE_LANGUAGE};

fn native_language() -> String {
    NATIVE_LANGUAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDef {
    pub name: String,
    #[serde(default = "native_language")]
    pub language: String,
    #[serde(flatten)]
    pub source: ScriptSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverDef {
    pub name: String,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDef {
    pub name: String,
    pub driver: String,
    /// Passed verbatim to the controller's `set`.
    #[serde(default)]
    pub init: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default = "native_language")]
    pub language: String,
    #[serde(flatten)]
    pub source: ScriptSource,
}

/// A complete model, loaded in prerequisite order: scripts, drivers,
/// devices, rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Model {
    pub scripts: Vec<ScriptDef>,
    pub drivers: Vec<DriverDef>,
    pub devices: Vec<DeviceDef>,
    pub rules: Vec<RuleDef>,
}

impl Model {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.scripts.len() + self.drivers.len() + self.devices.len() + self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands in admission order. A rule whose condition does not parse
    /// is returned as an error in its slot.
    pub fn commands(&self) -> Vec<(String, Result<Command>)> {
        let scripts = self.scripts.iter().map(|s| {
            let script = Script::new(&s.name, &s.language, s.source.clone(), s.call.clone());
            (s.name.clone(), Ok(Command::Script(Arc::new(script))))
        });
        let drivers = self.drivers.iter().map(|d| {
            let driver = Driver::new(&d.name, &d.script);
            (d.name.clone(), Ok(Command::Driver(Arc::new(driver))))
        });
        let devices = self.devices.iter().map(|d| {
            let device = Device::new(&d.name, &d.driver, d.init.clone(), d.groups.clone());
            (d.name.clone(), Ok(Command::Device(Arc::new(device))))
        });
        let rules = self.rules.iter().map(|r| {
            let rule = Rule::new(&r.name, r.when.as_deref(), &r.language, r.source.clone())
                .map(|rule| Command::Rule(Arc::new(rule)));
            (r.name.clone(), rule)
        });

        scripts.chain(drivers).chain(devices).chain(rules).collect()
    }
}
