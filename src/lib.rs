//! nsupdate: mount namespace reconciliation for sandboxed applications
//! Brings a live mount namespace from its current mount profile to a desired one
//! without following symlinks planted by the application that owns the tree
//!
//! # Architecture
//!
//! ## Reconciliation Core ([`core`])
//! - [`core::differ`]: Ordered diff of current and desired profiles
//! - [`core::change`]: Mount, unmount and keep changes and their execution
//! - [`core::mimic`]: Writable mimics of read-only directories
//! - [`core::apply`]: Applying a profile and reporting what happened
//!
//! ## Mount Profiles ([`profile`])
//! - [`profile::entry`]: Mount entries, kind markers and fstab escaping
//! - [`profile::profile`]: Ordered profiles and their on-disk codec
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::syscall`]: The syscall facade and its production implementation
//! - [`kernel::mount`]: Mount option parsing
//!
//! ## Safety ([`safety`])
//! - [`safety::secure_path`]: Symlink-race-safe creation of mount points
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit records of performed changes
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Configuration and the error taxonomy
//! - [`config::validator`]: Startup validation
//!
//! ## Utilities ([`utils`])
//! - [`utils::path`]: Lexical path cleaning and magic directory ordering
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::recorder`]: Recording syscall double with fault injection
//!
//! # Design Principles
//!
//! 1. **Descriptors, not strings** - Every walk is anchored at a freshly opened root
//! 2. **Order is load-bearing** - Children unmount before parents, parents mount before children
//! 3. **Nothing leaks** - Every descriptor is closed on every exit path
//! 4. **Explicit capabilities** - Syscalls are injected, never reached through globals

// Kernel Primitives
pub mod kernel;

// Reconciliation Core
pub mod core;

// Mount Profiles
pub mod profile;

// Safety
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// CLI
pub mod cli;

pub use config::types::{Result, UpdateConfig, UpdateError};
