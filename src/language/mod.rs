//! Pluggable action languages.
//!
//! Every embeddable language implements the same contract:
//!
//! 1. `prepare` checks/compiles source without touching the runtime. User
//!    errors are collected into the returned [`Prepared`], never thrown.
//! 2. `bind` registers an error-free artifact under an [`InvokerUid`].
//! 3. `execute` runs the bound code, any number of times.
//! 4. `new_controller` builds a hardware controller from the bound code, for
//!    languages able to do so.
//!
//! [`Executable`] wraps the four steps for the Scripts and Rules that own
//! code.

pub mod builder;
pub mod une;

pub use builder::{LanguageBuilder, LanguageConstructor};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::driver::Controller;
use crate::recovery::with_recovery;
use crate::registry::Runtime;
use crate::types::{Error, InvokerUid, Result};

/// Where a script's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    /// Inline source text.
    Code(String),
    /// Resource locations (`file://` URIs or plain paths).
    Uris(Vec<String>),
}

/// One user-code defect found while preparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl PrepareError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.column)
    }
}

/// Output of a language's prepare step. Consumed once by `bind`.
pub struct Prepared {
    /// Compiled code, `None` when preparation failed.
    pub code: Option<Box<dyn Any + Send + Sync>>,
    pub call: Option<String>,
    pub errors: Vec<PrepareError>,
    /// Language-specific metadata (e.g. `"uris"`: loaded libraries).
    pub extras: HashMap<String, serde_json::Value>,
}

impl Prepared {
    pub fn compiled(code: Box<dyn Any + Send + Sync>, call: Option<String>) -> Self {
        Self {
            code: Some(code),
            call,
            errors: Vec::new(),
            extras: HashMap::new(),
        }
    }

    pub fn failed(errors: Vec<PrepareError>, call: Option<String>) -> Self {
        Self {
            code: None,
            call,
            errors,
            extras: HashMap::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

impl fmt::Debug for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("compiled", &self.code.is_some())
            .field("call", &self.call)
            .field("errors", &self.errors)
            .field("extras", &self.extras)
            .finish()
    }
}

/// Contract implemented by every embeddable language.
pub trait LanguageRuntime: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Static check/compile. Returns `Err` only for host faults.
    fn prepare(&self, source: &ScriptSource, call: Option<&str>) -> Result<Prepared>;

    /// Register an error-free artifact. Re-binding a uid overwrites it.
    fn bind(&self, invoker: &InvokerUid, prepared: Prepared) -> Result<()>;

    /// Run bound code. Callers only execute what prepared without errors.
    fn execute(&self, invoker: &InvokerUid, runtime: &Runtime) -> Result<()>;

    /// Build a controller from bound code.
    fn new_controller(&self, invoker: &InvokerUid) -> Result<Box<dyn Controller>> {
        Err(Error::unsupported(format!(
            "language '{}' cannot create controllers (invoker {})",
            self.name(),
            invoker
        )))
    }

    /// Forget a bound uid. Returns whether it was bound.
    fn unbind(&self, invoker: &InvokerUid) -> bool;
}

/// Code owned by one Script or Rule, bound under its own invoker uid.
#[derive(Debug)]
pub struct Executable {
    owner: String,
    language: Arc<dyn LanguageRuntime>,
    invoker: InvokerUid,
    extras: HashMap<String, serde_json::Value>,
}

impl Executable {
    /// Resolve the language, prepare and bind.
    pub fn compile(
        owner: &str,
        language: &str,
        source: &ScriptSource,
        call: Option<&str>,
        languages: &LanguageBuilder,
    ) -> Result<Self> {
        let runtime = languages.resolve(language)?;
        let prepared = runtime.prepare(source, call)?;
        if prepared.has_errors() {
            return Err(Error::prepare(owner, prepared.errors));
        }

        let extras = prepared.extras.clone();
        let invoker = InvokerUid::new();
        runtime.bind(&invoker, prepared)?;
        tracing::debug!(owner, language, invoker = %invoker, "code bound");

        Ok(Self {
            owner: owner.to_string(),
            language: runtime,
            invoker,
            extras,
        })
    }

    pub fn run(&self, runtime: &Runtime) -> Result<()> {
        with_recovery(
            || self.language.execute(&self.invoker, runtime),
            "language.execute",
        )
    }

    pub fn new_controller(&self) -> Result<Box<dyn Controller>> {
        with_recovery(
            || self.language.new_controller(&self.invoker),
            "language.new_controller",
        )
    }

    pub fn release(&self) {
        if !self.language.unbind(&self.invoker) {
            tracing::warn!(owner = %self.owner, invoker = %self.invoker, "code was not bound");
        }
    }

    pub fn invoker(&self) -> &InvokerUid {
        &self.invoker
    }

    pub fn language(&self) -> &str {
        self.language.name()
    }

    pub fn extras(&self) -> &HashMap<String, serde_json::Value> {
        &self.extras
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepared_states() {
        let ok = Prepared::compiled(Box::new(42_u32), Some("main".into()))
            .with_extra("uris", serde_json::json!(["a.json"]));
        assert!(!ok.has_errors());
        assert_eq!(ok.extras["uris"], serde_json::json!(["a.json"]));
        assert_eq!(ok.code.as_ref().and_then(|c| c.downcast_ref::<u32>()), Some(&42));

        let failed = Prepared::failed(vec![PrepareError::new("bad", 2, 5)], None);
        assert!(failed.has_errors());
        assert!(failed.code.is_none());
        assert_eq!(failed.errors[0].to_string(), "bad at 2:5");
    }

    #[test]
    fn test_script_source_json_shape() {
        let code: ScriptSource = serde_json::from_str(r#"{"code":"[]"}"#).unwrap();
        assert_eq!(code, ScriptSource::Code("[]".into()));
        let uris: ScriptSource = serde_json::from_str(r#"{"uris":["file:///tmp/a.json"]}"#).unwrap();
        assert_eq!(uris, ScriptSource::Uris(vec!["file:///tmp/a.json".into()]));
    }
}
