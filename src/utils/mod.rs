//! Utilities
//!
//! Lexical path handling shared by the differ and the secure path builder.

pub mod path;
