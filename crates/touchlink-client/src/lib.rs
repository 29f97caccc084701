//! Session subsystem for the touchlink client.
//!
//! [`SessionManager`] is the command/event surface the UI layer talks to. It
//! owns the discovery directory, the frame normalizer, and one connection
//! session task per selected device; everything outside observes through
//! channels and never mutates core state directly.

pub mod config;
pub mod error;
pub mod manager;
mod session;
pub mod setup;
pub mod state;

pub use config::Config;
pub use error::ClientError;
pub use manager::{ManagerCommand, Notification, SessionManager};
pub use state::{CloseReason, SessionState};
