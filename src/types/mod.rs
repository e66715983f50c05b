//! Core types for the execution environment.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (InvokerUid, NodeId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for bus, languages and modules
//! - **Value**: Dynamically-typed device values

mod config;
mod errors;
mod ids;
mod value;

pub use config::{
    BusConfig, Config, LanguageConfig, ObservabilityConfig, NATIVE_IMPLEMENTATION,
    NATIVE_LANGUAGE,
};
pub use errors::{Error, Result};
pub use ids::{InvokerUid, NodeId};
pub use value::Value;
