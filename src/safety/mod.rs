//! Safety
//!
//! Builds mount points without ever following a symlink planted by the
//! less privileged application whose namespace is being updated.

pub mod secure_path;

pub use secure_path::{secure_mkdir_all, secure_mkfile_all, secure_mklink_all, secure_remove_link};
