//! arena-core — shared configuration and identity types for Chaos Arena.
//!
//! Every other crate in the workspace agrees on two things defined here:
//! how a session is named (`SessionId` and the cluster names derived from
//! it) and how the process is configured (`ArenaConfig`).

pub mod config;
pub mod types;

pub use config::{ArenaConfig, ConfigError};
pub use types::*;
