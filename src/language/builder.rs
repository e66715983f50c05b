//! Language resolution.
//!
//! A language name (case-insensitive) maps through [`Config::languages`] to
//! an implementation id and resource URIs; the implementation id maps to a
//! registered constructor. The first successful construction per language
//! is cached for the life of the process. Failures are not cached, so a
//! later call may retry.
//!
//! [`Config::languages`]: crate::types::Config

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::LanguageRuntime;
use crate::types::{Error, LanguageConfig, Result};

/// Builds a language runtime from its resolution entry.
pub type LanguageConstructor =
    Arc<dyn Fn(&LanguageConfig) -> Result<Arc<dyn LanguageRuntime>> + Send + Sync>;

pub struct LanguageBuilder {
    table: HashMap<String, LanguageConfig>,
    constructors: RwLock<HashMap<String, LanguageConstructor>>,
    cache: RwLock<HashMap<String, Arc<dyn LanguageRuntime>>>,
    build_lock: Mutex<()>,
}

impl fmt::Debug for LanguageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut constructors: Vec<String> = self.constructors.read().keys().cloned().collect();
        constructors.sort();
        f.debug_struct("LanguageBuilder")
            .field("languages", &self.table.keys().collect::<Vec<_>>())
            .field("constructors", &constructors)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl LanguageBuilder {
    pub fn new(table: HashMap<String, LanguageConfig>) -> Self {
        let table = table
            .into_iter()
            .map(|(name, cfg)| (name.to_lowercase(), cfg))
            .collect();
        Self {
            table,
            constructors: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    /// Register the constructor for an implementation id.
    pub fn register(&self, implementation: impl Into<String>, constructor: LanguageConstructor) {
        let implementation = implementation.into();
        tracing::debug!(implementation = %implementation, "language constructor registered");
        self.constructors.write().insert(implementation, constructor);
    }

    /// Resolve a language, constructing it on first use.
    pub fn resolve(&self, language: &str) -> Result<Arc<dyn LanguageRuntime>> {
        let key = language.trim().to_lowercase();
        if let Some(runtime) = self.cache.read().get(&key) {
            return Ok(Arc::clone(runtime));
        }

        let _guard = self.build_lock.lock();
        if let Some(runtime) = self.cache.read().get(&key) {
            return Ok(Arc::clone(runtime));
        }

        let config = self
            .table
            .get(&key)
            .ok_or_else(|| Error::config(format!("language '{}' is not configured", language)))?;
        let constructor = self
            .constructors
            .read()
            .get(&config.implementation)
            .cloned()
            .ok_or_else(|| {
                Error::config(format!(
                    "language '{}' maps to unknown implementation '{}'",
                    language, config.implementation
                ))
            })?;

        let runtime = constructor(config)?;
        tracing::info!(
            language = %key,
            implementation = %config.implementation,
            uris = config.uris.len(),
            "language runtime built"
        );
        self.cache.write().insert(key, Arc::clone(&runtime));
        Ok(runtime)
    }

    pub fn is_configured(&self, language: &str) -> bool {
        self.table.contains_key(&language.trim().to_lowercase())
    }
}
