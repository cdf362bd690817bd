//! Core serial-over-LAN protocol components.
//!
//! This module contains everything that talks to the management controller
//! and nothing that touches the local terminal:
//!
//! - **protocol**: frame layouts, decoder and encoders
//! - **state**: session lifecycle states and legal transitions
//! - **heartbeat**: keepalive schedule and liveness deadline
//! - **params**: session kind and bounded credentials
//! - **session**: the state machine tying the above to a transport
//!
//! # Architecture
//!
//! ```text
//! Session<T, H>
//! ├── T: Read + Write (connected transport)
//! ├── H: SessionHandler (console output, state notifications)
//! ├── Heartbeat (keepalive + liveness)
//! └── protocol::decode / encoders
//! ```

pub mod error;
pub mod heartbeat;
pub mod params;
pub mod protocol;
pub mod session;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use error::{Error, Result};
pub use params::{scrub, SessionKind, DEFAULT_USERNAME};
pub use session::{Session, SessionHandler};
pub use state::SessionState;
