//! Command lifecycle: `Created → Started → Stopped`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Created,
    Started,
    Stopped,
}

impl CommandState {
    pub fn can_transition_to(self, to: CommandState) -> bool {
        match (self, to) {
            (CommandState::Created, CommandState::Started) => true,
            // never admitted, discarded
            (CommandState::Created, CommandState::Stopped) => true,
            (CommandState::Started, CommandState::Stopped) => true,
            // STOPPED is terminal
            _ => false,
        }
    }
}

/// Guarded state cell shared by every command type.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<CommandState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: Mutex::new(CommandState::Created),
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> CommandState {
        *self.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.state() == CommandState::Started
    }

    pub fn start(&self, name: &str) -> Result<()> {
        self.transition(name, CommandState::Started)
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.transition(name, CommandState::Stopped)
    }

    fn transition(&self, name: &str, to: CommandState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(to) {
            return Err(Error::state_transition(format!(
                "'{}' cannot go from {:?} to {:?}",
                name, *state, to
            )));
        }
        *state = to;
        Ok(())
    }
}
