//! Testing infrastructure
//!
//! A recording syscall double used to prove exact call sequences and
//! descriptor accounting without touching the real mount table.

pub mod recorder;

// Re-export commonly used items
pub use recorder::*;
