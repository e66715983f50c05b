//! # ExEn Core - Automation Execution Environment
//!
//! Runtime core of an execution environment for a home/industrial automation
//! language:
//! - Event bus with ordered, delayed and cancellable periodic delivery
//! - Command registry of Devices, Drivers, Scripts and Rules
//! - Driver-to-Controller binding with shared controllers
//! - Pluggable action languages, with the native `une` interpreter
//! - Grid replication of device changes over abstract transports
//!
//! ## Architecture
//!
//! ```text
//!   Controller ──► DriverListener ──► EventBus ──► Dispatcher
//!        ▲                              ▲   │          │
//!        │ write/read                   │   │     Rule / Script
//!        └────────── Driver ◄───────────┼───┘          │
//!                                       └── une actions┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod dispatch;
pub mod driver;
pub mod exen;
pub mod language;
pub mod message;
pub mod model;
pub mod registry;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;
pub mod recovery;

pub use exen::{ExEn, LoadFailure, LoadReport};
pub use types::{Config, Error, Result};
