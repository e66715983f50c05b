//! Bus messages.
//!
//! A [`Message`] is an immutable, timestamped event. Its [`Payload`] says what
//! happened and to which named target. Messages are shared between listeners
//! as `Arc<Message>` and never mutated after construction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Value;

/// Payload variants carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Please set this actuator.
    ChangeActuator { name: String, value: Value },

    /// The device's value has authoritatively changed (already reconciled).
    DeviceChanged {
        name: String,
        value: Value,
        is_own: bool,
    },

    /// Raw reading from the physical/simulated world, not yet reconciled.
    DeviceReaded {
        name: String,
        value: Value,
        is_own: bool,
    },

    /// Run this script/rule now; `force` skips the rule condition.
    Execute {
        name: String,
        force: bool,
        is_own: bool,
    },

    /// Request to run a script or rule.
    Trigger { name: String, force: bool },

    /// Request a fresh read of a device.
    ReadDevice { name: String },

    /// A fault report, optionally tied to a device.
    Error {
        message: String,
        device: Option<String>,
    },
}

/// Runtime type tag of a payload, used for listener filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ChangeActuator,
    DeviceChanged,
    DeviceReaded,
    Execute,
    Trigger,
    ReadDevice,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::ChangeActuator,
        MessageKind::DeviceChanged,
        MessageKind::DeviceReaded,
        MessageKind::Execute,
        MessageKind::Trigger,
        MessageKind::ReadDevice,
        MessageKind::Error,
    ];
}

/// Immutable bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Wall-clock creation time in milliseconds since the epoch.
    pub timestamp_ms: i64,

    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn change_actuator(name: impl Into<String>, value: Value) -> Self {
        Self::new(Payload::ChangeActuator {
            name: name.into(),
            value,
        })
    }

    pub fn device_changed(name: impl Into<String>, value: Value, is_own: bool) -> Self {
        Self::new(Payload::DeviceChanged {
            name: name.into(),
            value,
            is_own,
        })
    }

    pub fn device_readed(name: impl Into<String>, value: Value, is_own: bool) -> Self {
        Self::new(Payload::DeviceReaded {
            name: name.into(),
            value,
            is_own,
        })
    }

    pub fn execute(name: impl Into<String>, force: bool, is_own: bool) -> Self {
        Self::new(Payload::Execute {
            name: name.into(),
            force,
            is_own,
        })
    }

    pub fn trigger(name: impl Into<String>, force: bool) -> Self {
        Self::new(Payload::Trigger {
            name: name.into(),
            force,
        })
    }

    pub fn read_device(name: impl Into<String>) -> Self {
        Self::new(Payload::ReadDevice { name: name.into() })
    }

    pub fn error(message: impl Into<String>, device: Option<String>) -> Self {
        Self::new(Payload::Error {
            message: message.into(),
            device,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::ChangeActuator { .. } => MessageKind::ChangeActuator,
            Payload::DeviceChanged { .. } => MessageKind::DeviceChanged,
            Payload::DeviceReaded { .. } => MessageKind::DeviceReaded,
            Payload::Execute { .. } => MessageKind::Execute,
            Payload::Trigger { .. } => MessageKind::Trigger,
            Payload::ReadDevice { .. } => MessageKind::ReadDevice,
            Payload::Error { .. } => MessageKind::Error,
        }
    }

    /// Target name; for `Error` messages the device name when known.
    pub fn target(&self) -> Option<&str> {
        match &self.payload {
            Payload::ChangeActuator { name, .. }
            | Payload::DeviceChanged { name, .. }
            | Payload::DeviceReaded { name, .. }
            | Payload::Execute { name, .. }
            | Payload::Trigger { name, .. }
            | Payload::ReadDevice { name } => Some(name),
            Payload::Error { device, .. } => device.as_deref(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::ChangeActuator { value, .. }
            | Payload::DeviceChanged { value, .. }
            | Payload::DeviceReaded { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Whether this node produced the message. Messages without an origin
    /// flag are always local.
    pub fn is_own(&self) -> bool {
        match &self.payload {
            Payload::DeviceChanged { is_own, .. }
            | Payload::DeviceReaded { is_own, .. }
            | Payload::Execute { is_own, .. } => *is_own,
            _ => true,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())?;
        if let Some(target) = self.target() {
            write!(f, "({}", target)?;
            if let Some(value) = self.value() {
                write!(f, "={}", value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
