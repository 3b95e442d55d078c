//! Mount namespace reconciliation core.
//!
//! The differ computes what has to change, changes know how to perform
//! themselves, and the mimic planner makes read-only directories writable
//! when a mount point has to be created inside one.

pub mod apply;
pub mod change;
pub mod differ;
pub mod mimic;

pub use apply::{apply_profile, ApplyReport, ChangeFailure};
pub use change::{Action, Change, MountContext};
pub use differ::needed_changes;
pub use mimic::plan_writable_mimic;
