//! Mount option handling
//!
//! Maps profile option strings onto `mount(2)` flags.

pub mod options;

// Re-export commonly used items
pub use options::*;
