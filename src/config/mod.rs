//! Configuration
//!
//! Update configuration, error taxonomy, and startup validation.

pub mod types;
pub mod validator;
