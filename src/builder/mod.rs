//! Builder API for ergonomic engine construction.
//!
//! This module provides the fluent [`EngineBuilder`], the serde-backed
//! [`EngineConfig`], and the `state_enum!` macro for declaring simple
//! enum states with minimal boilerplate.

pub mod config;
pub mod engine;
pub mod error;
pub mod macros;

pub use config::{ConfigError, EngineConfig};
pub use engine::EngineBuilder;
pub use error::BuildError;
