use std::sync::OnceLock;

use super::{Lifecycle, Runtime};
use crate::driver::Controller;
use crate::language::{Executable, ScriptSource};
use crate::types::{Error, Result};

/// Named code in some language: rule actions or a controller factory.
#[derive(Debug)]
pub struct Script {
    name: String,
    language: String,
    source: ScriptSource,
    call: Option<String>,
    lifecycle: Lifecycle,
    exec: OnceLock<Executable>,
}

impl Script {
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        source: ScriptSource,
        call: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            source,
            call,
            lifecycle: Lifecycle::default(),
            exec: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn executable(&self) -> Option<&Executable> {
        self.exec.get()
    }

    fn bound(&self) -> Result<&Executable> {
        self.exec
            .get()
            .ok_or_else(|| Error::state_transition(format!("script '{}' is not started", self.name)))
    }

    /// Prepare and bind the code. Prepare errors fail admission.
    pub fn start(&self, runtime: &Runtime) -> Result<()> {
        self.lifecycle.start(&self.name)?;
        let exec = Executable::compile(
            &self.name,
            &self.language,
            &self.source,
            self.call.as_deref(),
            runtime.languages(),
        )?;
        let _ = self.exec.set(exec);
        tracing::debug!(script = %self.name, language = %self.language, "script bound");
        Ok(())
    }

    pub fn run(&self, runtime: &Runtime) -> Result<()> {
        self.bound()?.run(runtime)
    }

    pub fn new_controller(&self) -> Result<Box<dyn Controller>> {
        self.bound()?.new_controller()
    }

    pub fn stop(&self) -> Result<()> {
        self.lifecycle.stop(&self.name)?;
        if let Some(exec) = self.exec.get() {
            exec.release();
        }
        Ok(())
    }
}
