//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store fetch / bus publish / bus reconnect:
//!     → timeouts.rs (bound the whole operation by a deadline)
//!     → retries.rs (retry transient failures with backoff)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only transient failures are retried; validation failures surface immediately
//! - Retries stay inside the deadline, so callers never wait past it

pub mod backoff;
pub mod retries;
pub mod timeouts;
