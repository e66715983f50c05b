use std::collections::HashMap;
use std::sync::OnceLock;

use super::{Lifecycle, Runtime};
use crate::language::une::Expression;
use crate::language::{Executable, PrepareError, ScriptSource};
use crate::types::{Error, Result};

/// Condition plus actions, fired by `Trigger`/`Execute` or by a change of
/// any device its condition reads.
#[derive(Debug)]
pub struct Rule {
    name: String,
    condition: Option<Expression>,
    language: String,
    source: ScriptSource,
    lifecycle: Lifecycle,
    exec: OnceLock<Executable>,
}

impl Rule {
    /// Parses `when` up front; a malformed condition is a prepare error.
    pub fn new(
        name: impl Into<String>,
        when: Option<&str>,
        language: impl Into<String>,
        source: ScriptSource,
    ) -> Result<Self> {
        let name = name.into();
        let condition = when
            .filter(|w| !w.trim().is_empty())
            .map(|w| {
                Expression::parse(w).map_err(|e| {
                    let (line, column) = e.position(w);
                    Error::prepare(
                        name.clone(),
                        vec![PrepareError::new(format!("when: {}", e.message), line, column)],
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            name,
            condition,
            language: language.into(),
            source,
            lifecycle: Lifecycle::default(),
            exec: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Whether the condition reads `device`.
    pub fn depends_on(&self, device: &str) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|condition| condition.references(device))
    }

    /// Evaluate the condition. Rules without one always hold; an
    /// uninitialized device makes it false.
    pub fn holds(&self, runtime: &Runtime) -> Result<bool> {
        let Some(condition) = &self.condition else {
            return Ok(true);
        };
        let mut vars = HashMap::new();
        for name in condition.variables() {
            match runtime.device_value(name)? {
                Some(value) => {
                    vars.insert(name.clone(), value);
                }
                None => return Ok(false),
            }
        }
        condition
            .eval(&vars)
            .map(|value| value.is_truthy())
            .map_err(|e| Error::validation(format!("rule '{}' condition failed: {}", self.name, e)))
    }

    pub fn start(&self, runtime: &Runtime) -> Result<()> {
        self.lifecycle.start(&self.name)?;
        let exec = Executable::compile(
            &self.name,
            &self.language,
            &self.source,
            None,
            runtime.languages(),
        )?;
        let _ = self.exec.set(exec);
        Ok(())
    }

    /// Run the actions when forced or when the condition holds. Returns
    /// whether they ran.
    pub fn fire(&self, runtime: &Runtime, force: bool) -> Result<bool> {
        let exec = self
            .exec
            .get()
            .ok_or_else(|| Error::state_transition(format!("rule '{}' is not started", self.name)))?;
        if !force && !self.holds(runtime)? {
            tracing::debug!(rule = %self.name, "condition does not hold");
            return Ok(false);
        }
        exec.run(runtime)?;
        Ok(true)
    }

    pub fn stop(&self) -> Result<()> {
        self.lifecycle.stop(&self.name)?;
        if let Some(exec) = self.exec.get() {
            exec.release();
        }
        Ok(())
    }
}
