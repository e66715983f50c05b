use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{Device, Runtime, Rule, Script};
use crate::driver::Driver;
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Device,
    Driver,
    Script,
    Rule,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Device,
        CommandKind::Driver,
        CommandKind::Script,
        CommandKind::Rule,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Device => "device",
            CommandKind::Driver => "driver",
            CommandKind::Script => "script",
            CommandKind::Rule => "rule",
        }
    }

    /// Parse a type token: case-insensitive, singular or plural.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        let singular = token.strip_suffix('s').unwrap_or(&token);
        Self::ALL.into_iter().find(|kind| kind.as_str() == singular)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live entity owned by the [`Runtime`].
#[derive(Debug, Clone)]
pub enum Command {
    Device(Arc<Device>),
    Driver(Arc<Driver>),
    Script(Arc<Script>),
    Rule(Arc<Rule>),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Device(d) => d.name(),
            Command::Driver(d) => d.name(),
            Command::Script(s) => s.name(),
            Command::Rule(r) => r.name(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Device(_) => CommandKind::Device,
            Command::Driver(_) => CommandKind::Driver,
            Command::Script(_) => CommandKind::Script,
            Command::Rule(_) => CommandKind::Rule,
        }
    }

    /// Whether both refer to the same live instance.
    pub fn same_instance(&self, other: &Command) -> bool {
        match (self, other) {
            (Command::Device(a), Command::Device(b)) => Arc::ptr_eq(a, b),
            (Command::Driver(a), Command::Driver(b)) => Arc::ptr_eq(a, b),
            (Command::Script(a), Command::Script(b)) => Arc::ptr_eq(a, b),
            (Command::Rule(a), Command::Rule(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_device(&self) -> Option<&Arc<Device>> {
        match self {
            Command::Device(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_driver(&self) -> Option<&Arc<Driver>> {
        match self {
            Command::Driver(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&Arc<Script>> {
        match self {
            Command::Script(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rule(&self) -> Option<&Arc<Rule>> {
        match self {
            Command::Rule(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn start(&self, runtime: &Runtime) -> Result<()> {
        match self {
            Command::Device(d) => d.start(runtime),
            Command::Driver(d) => d.start(runtime),
            Command::Script(s) => s.start(runtime),
            Command::Rule(r) => r.start(runtime),
        }
    }

    /// Devices leave through their driver so its binding goes too.
    pub(crate) fn stop(&self) -> Result<()> {
        match self {
            Command::Device(d) => match d.driver() {
                Some(driver) => driver.remove(d),
                None => d.stop(),
            },
            Command::Driver(d) => d.stop(),
            Command::Script(s) => s.stop(),
            Command::Rule(r) => r.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tokens() {
        assert_eq!(CommandKind::from_token("Devices"), Some(CommandKind::Device));
        assert_eq!(CommandKind::from_token("DRIVER"), Some(CommandKind::Driver));
        assert_eq!(CommandKind::from_token(" scripts "), Some(CommandKind::Script));
        assert_eq!(CommandKind::from_token("rule"), Some(CommandKind::Rule));
        assert_eq!(CommandKind::from_token("gadget"), None);
        assert_eq!(CommandKind::from_token(""), None);
        assert_eq!(CommandKind::Rule.to_string(), "rule");
    }
}
