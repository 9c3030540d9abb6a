//! Downstream transport subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarder
//!     → body.rs (inbound body tagging)
//!     → client.rs (permit, deadline, shared keep-alive pool)
//!     → connector.rs (TCP connect bounded by the backend's connect timeout)
//!     → Backend
//!     → body.rs (response body bounded by the same deadline)
//! ```

pub mod body;
pub mod client;
pub mod connector;

pub use body::ClientBody;
pub use client::{TimeoutPhase, Transport, TransportError};
