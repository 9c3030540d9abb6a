//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → registry.rs (route lookup)
//!     → matcher.rs (segment-aware prefix match)
//!     → Return: (BackendDescriptor, sub-path) or RoutingError::NotFound
//!
//! Route Compilation (at startup):
//!     BackendConfig[]
//!     → Normalize prefixes
//!     → Sort longest first
//!     → Freeze as immutable ServiceRegistry
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - A routing miss never touches a circuit breaker

pub mod matcher;
pub mod registry;

pub use registry::{BackendDescriptor, RoutingError, ServiceRegistry};
