//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated in [`syscall`] with explicit SAFETY comments.

pub mod mount;
pub mod syscall;
