//! Une, the native action language.
//!
//! Programs arrive as JSON emitted by the model compiler, either a bare
//! array of actions or an object:
//!
//! ```json
//! { "controller": "virtual", "actions": [ { "kind": "assign_device", ... } ] }
//! ```
//!
//! `prepare` parses and checks every expression; `bind` stores the program
//! under its invoker uid; `execute` runs the actions in order.

pub mod action;
pub mod expr;

pub use action::{Action, ActionDef, Outcome};
pub use expr::{ExprError, Expression};

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{LanguageRuntime, PrepareError, Prepared, ScriptSource};
use crate::driver::{Controller, ControllerCatalog};
use crate::registry::Runtime;
use crate::types::{Error, InvokerUid, Result, NATIVE_LANGUAGE};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramObject {
    #[serde(default)]
    controller: Option<String>,
    #[serde(default)]
    actions: Vec<ActionDef>,
}

/// A checked, not yet bound program.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProgramDef {
    pub controller: Option<String>,
    pub actions: Vec<ActionDef>,
    pub call: Option<String>,
}

impl ProgramDef {
    /// Parse one program text, collecting every defect found.
    fn parse(text: &str, origin: Option<&str>) -> std::result::Result<Self, Vec<PrepareError>> {
        let located = |message: String, line: usize, column: usize| match origin {
            Some(origin) => PrepareError::new(format!("{}: {}", origin, message), line, column),
            None => PrepareError::new(message, line, column),
        };

        let parsed = if text.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<ActionDef>>(text).map(|actions| ProgramObject {
                controller: None,
                actions,
            })
        } else {
            serde_json::from_str::<ProgramObject>(text)
        };
        let object = parsed.map_err(|e| {
            // serde_json appends " at line L column C" to the message
            let message = e.to_string();
            let message = message
                .rsplit_once(" at line ")
                .map_or(message.as_str(), |(head, _)| head)
                .to_string();
            vec![located(message, e.line(), e.column())]
        })?;

        let errors: Vec<PrepareError> = object
            .actions
            .iter()
            .enumerate()
            .filter_map(|(index, def)| {
                let source = def.expression()?;
                let err = Expression::parse(source).err()?;
                let (line, column) = err.position(source);
                Some(located(
                    format!("action {}: {}", index + 1, err.message),
                    line,
                    column,
                ))
            })
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self {
            controller: object.controller,
            actions: object.actions,
            call: None,
        })
    }

    fn merge(&mut self, other: ProgramDef) {
        if other.controller.is_some() {
            self.controller = other.controller;
        }
        self.actions.extend(other.actions);
    }
}

/// A bound program.
#[derive(Debug)]
pub struct Program {
    controller: Option<String>,
    actions: Vec<Action>,
}

impl Program {
    fn from_def(def: ProgramDef) -> Self {
        Self {
            controller: def.controller,
            actions: def.actions.into_iter().map(Action::new).collect(),
        }
    }

    pub fn controller(&self) -> Option<&str> {
        self.controller.as_deref()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Run every action in order; the first fatal error aborts the firing.
    pub fn run(&self, runtime: &Runtime) -> Result<Vec<Outcome>> {
        self.actions.iter().map(|action| action.run(runtime)).collect()
    }
}

fn read_uri(uri: &str) -> std::io::Result<String> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    std::fs::read_to_string(Path::new(path))
}

/// The native language runtime.
#[derive(Debug)]
pub struct UneRuntime {
    catalog: Arc<ControllerCatalog>,
    programs: RwLock<HashMap<InvokerUid, Arc<Program>>>,
}

impl UneRuntime {
    pub fn new(catalog: Arc<ControllerCatalog>) -> Self {
        Self {
            catalog,
            programs: RwLock::new(HashMap::new()),
        }
    }

    pub fn program(&self, invoker: &InvokerUid) -> Option<Arc<Program>> {
        self.programs.read().get(invoker).cloned()
    }

    pub fn bound(&self) -> usize {
        self.programs.read().len()
    }
}

impl LanguageRuntime for UneRuntime {
    fn name(&self) -> &str {
        NATIVE_LANGUAGE
    }

    fn prepare(&self, source: &ScriptSource, call: Option<&str>) -> Result<Prepared> {
        let call = call.map(String::from);
        let mut program = ProgramDef::default();
        let mut errors = Vec::new();
        let mut loaded = Vec::new();

        match source {
            ScriptSource::Code(text) => match ProgramDef::parse(text, None) {
                Ok(def) => program.merge(def),
                Err(mut found) => errors.append(&mut found),
            },
            ScriptSource::Uris(uris) => {
                for uri in uris {
                    let text = match read_uri(uri) {
                        Ok(text) => text,
                        Err(e) => {
                            errors.push(PrepareError::new(format!("{}: {}", uri, e), 0, 0));
                            continue;
                        }
                    };
                    match ProgramDef::parse(&text, Some(uri)) {
                        Ok(def) => {
                            program.merge(def);
                            loaded.push(uri.clone());
                        }
                        Err(mut found) => errors.append(&mut found),
                    }
                }
            }
        }

        let prepared = if errors.is_empty() {
            program.call = call.clone();
            Prepared::compiled(Box::new(program), call)
        } else {
            Prepared::failed(errors, call)
        };
        Ok(prepared.with_extra("uris", serde_json::json!(loaded)))
    }

    fn bind(&self, invoker: &InvokerUid, prepared: Prepared) -> Result<()> {
        let def = prepared
            .code
            .ok_or_else(|| Error::internal("bind called with a failed preparation"))?
            .downcast::<ProgramDef>()
            .map_err(|_| Error::internal("prepared code was not produced by the native language"))?;

        let program = Program::from_def(*def);
        tracing::debug!(
            invoker = %invoker,
            actions = program.actions.len(),
            controller = ?program.controller,
            "une program bound"
        );
        self.programs.write().insert(invoker.clone(), Arc::new(program));
        Ok(())
    }

    fn execute(&self, invoker: &InvokerUid, runtime: &Runtime) -> Result<()> {
        let program = self
            .program(invoker)
            .ok_or_else(|| Error::not_found(format!("no une program bound to {}", invoker)))?;
        let outcomes = program.run(runtime)?;
        tracing::trace!(invoker = %invoker, outcomes = ?outcomes, "une program ran");
        Ok(())
    }

    fn new_controller(&self, invoker: &InvokerUid) -> Result<Box<dyn Controller>> {
        let program = self
            .program(invoker)
            .ok_or_else(|| Error::not_found(format!("no une program bound to {}", invoker)))?;
        let name = program.controller().ok_or_else(|| {
            Error::unsupported(format!("une program {} does not name a controller", invoker))
        })?;
        self.catalog.create(name)
    }

    fn unbind(&self, invoker: &InvokerUid) -> bool {
        self.programs.write().remove(invoker).is_some()
    }
}
