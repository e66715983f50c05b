//! Une actions.
//!
//! A program is an ordered list of actions. Every action runs independently
//! when the owning Script or Rule fires; the first fatal error aborts the
//! rest of that firing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::expr::Expression;
use crate::message::Message;
use crate::registry::Runtime;
use crate::types::{Error, Result, Value};

/// One action as emitted by the model compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDef {
    /// Copy another device's current value into `target`.
    AssignDevice {
        target: String,
        device: String,
        #[serde(default)]
        delay_ms: i64,
    },
    /// Write a literal into `target`.
    AssignData {
        target: String,
        value: Value,
        #[serde(default)]
        delay_ms: i64,
    },
    /// Evaluate `expression` and write the result into `target`.
    AssignExpression {
        target: String,
        expression: String,
        #[serde(default)]
        delay_ms: i64,
    },
    /// Evaluate `expression` and discard the result.
    Expression { expression: String },
    /// Ask the bus to run another rule or script.
    RuleOrScript {
        target: String,
        #[serde(default)]
        delay_ms: i64,
    },
}

impl ActionDef {
    pub fn expression(&self) -> Option<&str> {
        match self {
            ActionDef::AssignExpression { expression, .. } | ActionDef::Expression { expression } => {
                Some(expression)
            }
            _ => None,
        }
    }

    pub fn delay(&self) -> Duration {
        let ms = match self {
            ActionDef::AssignDevice { delay_ms, .. }
            | ActionDef::AssignData { delay_ms, .. }
            | ActionDef::AssignExpression { delay_ms, .. }
            | ActionDef::RuleOrScript { delay_ms, .. } => *delay_ms,
            ActionDef::Expression { .. } => 0,
        };
        Duration::from_millis(ms.max(0) as u64)
    }
}

/// What a single action did during one firing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A message was posted to the bus.
    Posted(Message),
    /// An expression ran for its side effects.
    Evaluated,
    /// A referenced device has no value yet.
    Skipped,
}

/// A bound action with its lazily built evaluator.
#[derive(Debug)]
pub struct Action {
    def: ActionDef,
    evaluator: Mutex<Option<Arc<Expression>>>,
}

impl Action {
    pub fn new(def: ActionDef) -> Self {
        Self {
            def,
            evaluator: Mutex::new(None),
        }
    }

    pub fn def(&self) -> &ActionDef {
        &self.def
    }

    pub fn run(&self, runtime: &Runtime) -> Result<Outcome> {
        let value = match &self.def {
            ActionDef::RuleOrScript { target, .. } => {
                return self.post(runtime, Message::trigger(target.as_str(), false));
            }
            ActionDef::Expression { expression } => {
                return Ok(match self.evaluate(expression, runtime)? {
                    Some(_) => Outcome::Evaluated,
                    None => Outcome::Skipped,
                });
            }
            ActionDef::AssignData { value, .. } => Some(value.clone()),
            ActionDef::AssignDevice { device, .. } => runtime.device_value(device)?,
            ActionDef::AssignExpression { expression, .. } => self.evaluate(expression, runtime)?,
        };

        match (value, self.target()) {
            (Some(value), Some(target)) => {
                self.post(runtime, Message::change_actuator(target, value))
            }
            _ => {
                tracing::debug!(action = ?self.def, "uninitialized device, action skipped");
                Ok(Outcome::Skipped)
            }
        }
    }

    fn target(&self) -> Option<&str> {
        match &self.def {
            ActionDef::AssignDevice { target, .. }
            | ActionDef::AssignData { target, .. }
            | ActionDef::AssignExpression { target, .. }
            | ActionDef::RuleOrScript { target, .. } => Some(target),
            ActionDef::Expression { .. } => None,
        }
    }

    fn post(&self, runtime: &Runtime, message: Message) -> Result<Outcome> {
        runtime.post_delayed(message.clone(), self.def.delay())?;
        Ok(Outcome::Posted(message))
    }

    fn evaluator(&self, source: &str) -> Result<Arc<Expression>> {
        let mut cached = self.evaluator.lock();
        if let Some(expr) = cached.as_ref() {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(
            Expression::parse(source)
                .map_err(|e| Error::validation(format!("expression '{}': {}", source, e)))?,
        );
        *cached = Some(Arc::clone(&expr));
        Ok(expr)
    }

    /// `Ok(None)` when some referenced device has not produced a value yet.
    fn evaluate(&self, source: &str, runtime: &Runtime) -> Result<Option<Value>> {
        let expr = self.evaluator(source)?;
        let mut vars = HashMap::with_capacity(expr.variables().len());
        for name in expr.variables() {
            match runtime.device_value(name)? {
                Some(value) => {
                    vars.insert(name.clone(), value);
                }
                None => return Ok(None),
            }
        }
        expr.eval(&vars)
            .map(Some)
            .map_err(|e| Error::validation(format!("expression '{}' failed: {}", source, e)))
    }
}
