//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, auth extractor)
//!     → [routing layer resolves backend + sub-path]
//!     → request.rs (body policy, hop-by-hop strip, upstream request)
//!     → forwarder.rs (breaker-guarded call through the shared transport)
//!     → response.rs (hop-by-hop strip, streamed relay)
//!     → Send to client
//! ```

pub mod forwarder;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use forwarder::Forwarder;
pub use server::{AppState, HttpServer};
