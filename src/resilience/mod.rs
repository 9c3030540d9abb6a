//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → bank.rs (look up the backend's breaker)
//!     → circuit_breaker.rs (admit, reject fast, or admit the single probe)
//!     → forwarded call, deadline enforced by the transport
//!     → outcome classified and recorded back into the breaker
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - The gateway never retries; a failed forward is reported once
//! - Circuit breaker prevents cascading failures
//! - Only backend-attributable outcomes move a breaker

pub mod bank;
pub mod circuit_breaker;

pub use bank::BreakerBank;
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CallError, CircuitBreaker, Outcome};
