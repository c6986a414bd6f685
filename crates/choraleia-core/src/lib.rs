//! Shared foundation for the Choraleia workspace orchestrator: configuration,
//! the common error type, and the entity model (workspaces, runtimes, assets,
//! rooms) that every other crate builds on.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ChoraleiaError, Result};
