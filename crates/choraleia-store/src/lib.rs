//! Relational persistence for Choraleia: workspaces, assets, rooms,
//! conversations, the per-conversation message branch tree, and browser
//! instance rows.
//!
//! A single SQLite connection behind a `Mutex` is sufficient for the
//! single-node target; every write that must be atomic (branch-index
//! allocation in particular) runs inside an explicit transaction.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::Store;
