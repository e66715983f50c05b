//! Configuration structures.
//!
//! Configuration is loaded from JSON files; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Name under which the native action language is registered.
pub const NATIVE_LANGUAGE: &str = "une";

/// Implementation identifier of the native interpreter.
pub const NATIVE_IMPLEMENTATION: &str = "native";

/// Global execution environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Event bus configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Language resolution table: language name -> implementation + resources.
    #[serde(default = "default_languages")]
    pub languages: HashMap<String, LanguageConfig>,

    /// Opaque per-module key/value settings.
    #[serde(default)]
    pub modules: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            observability: ObservabilityConfig::default(),
            languages: default_languages(),
            modules: HashMap::new(),
        }
    }
}

fn default_languages() -> HashMap<String, LanguageConfig> {
    let mut languages = HashMap::new();
    languages.insert(
        NATIVE_LANGUAGE.to_string(),
        LanguageConfig {
            implementation: NATIVE_IMPLEMENTATION.to_string(),
            uris: Vec::new(),
        },
    );
    languages
}

impl Config {
    /// Parse a configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Read one opaque module setting.
    pub fn module_setting(&self, module: &str, key: &str) -> Option<&serde_json::Value> {
        self.modules.get(module).and_then(|settings| settings.get(key))
    }

    fn validate(&self) -> Result<()> {
        for (name, lang) in &self.languages {
            if name.trim().is_empty() {
                return Err(Error::config("language name cannot be empty"));
            }
            if lang.implementation.trim().is_empty() {
                return Err(Error::config(format!(
                    "language '{}' has no implementation",
                    name
                )));
            }
        }
        if self.bus.thread_name.is_empty() {
            return Err(Error::config("bus.thread_name cannot be empty"));
        }
        Ok(())
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum queued messages (due or not yet due). 0 means unbounded.
    pub max_pending: usize,

    /// Window used by the delivery speed meter.
    #[serde(with = "humantime_serde")]
    pub speed_window: Duration,

    /// Name given to the dedicated delivery thread.
    pub thread_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_pending: 0,
            speed_window: Duration::from_secs(60),
            thread_name: "exen-bus".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// How a language name resolves to a concrete runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Key into the language constructor registry.
    pub implementation: String,

    /// Resources the implementation needs to load (libraries, jars, ...).
    #[serde(default)]
    pub uris: Vec<String>,
}
