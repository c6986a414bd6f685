//! Workspace lifecycle: the per-workspace state machine, phased container
//! bring-up on local or remote Docker, reconcile-on-boot, and the exec
//! channel used by agent tools.

pub mod controller;
pub mod error;
pub mod events;

pub use controller::RuntimeController;
pub use error::{Result, RuntimeError};
pub use events::{RuntimeEvent, RuntimeEvents, RuntimePhase};
