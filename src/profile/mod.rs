//! Mount profiles
//!
//! Mount entries and ordered profiles, with a thin fstab-style codec used by
//! the binary to load desired profiles and persist the applied one.

pub mod entry;
pub mod profile;

pub use entry::{EntryKind, MountEntry};
pub use profile::MountProfile;
