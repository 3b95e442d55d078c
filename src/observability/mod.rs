//! Observability
//!
//! Structured audit records of every change made to a mount namespace.

pub mod audit;
