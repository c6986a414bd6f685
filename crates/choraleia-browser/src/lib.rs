//! Browser sub-controller: headless-Chromium containers per conversation,
//! driven over the DevTools protocol, tunneled through SSH for remote
//! runtimes.

pub mod controller;
pub mod devtools;
pub mod error;
pub mod types;

pub use controller::BrowserController;
pub use devtools::DevToolsClient;
pub use error::{BrowserError, Result};
pub use types::{BrowserInstance, BrowserRuntimeType, BrowserStatus, Tab};
