/// Mount changes and their execution
use crate::config::types::{Result, UpdateConfig, UpdateError};
use crate::core::mimic::plan_writable_mimic;
use crate::kernel::mount::options_to_flags;
use crate::kernel::syscall::Syscalls;
use crate::profile::{EntryKind, MountEntry};
use crate::safety::{secure_mkdir_all, secure_mkfile_all, secure_mklink_all, secure_remove_link};
use log::{debug, info};
use nix::mount::{MntFlags, MsFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What to do with a mount entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Already mounted as desired; nothing to do
    Keep,
    Mount,
    Unmount,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Keep => "keep",
            Action::Mount => "mount",
            Action::Unmount => "unmount",
        };
        f.write_str(name)
    }
}

impl FromStr for Action {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(Action::Keep),
            "mount" => Ok(Action::Mount),
            "unmount" => Ok(Action::Unmount),
            other => Err(UpdateError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

/// One unit of work on the mount namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub entry: MountEntry,
    pub action: Action,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.action, self.entry)
    }
}

/// Everything a change needs to touch the system
#[derive(Clone, Copy)]
pub struct MountContext<'a> {
    pub sys: &'a dyn Syscalls,
    pub config: &'a UpdateConfig,
}

impl<'a> MountContext<'a> {
    pub fn new(sys: &'a dyn Syscalls, config: &'a UpdateConfig) -> Self {
        Self { sys, config }
    }
}

/// Whether a read-only ancestor may be replaced by a writable mimic
#[derive(Clone, Copy, PartialEq, Eq)]
enum MimicPolicy {
    Allow,
    Forbid,
}

impl Change {
    pub fn new(action: Action, entry: MountEntry) -> Self {
        Self { entry, action }
    }

    /// Apply the change to the mount namespace.
    ///
    /// Changes that had to be performed first, such as the steps of a
    /// writable mimic built over a read-only ancestor, are appended to
    /// `synthesized` as they succeed. They are kept there when this change
    /// fails, so the caller can record what was actually done.
    pub fn perform(&self, ctx: &MountContext<'_>, synthesized: &mut Vec<Change>) -> Result<()> {
        self.perform_with(ctx, synthesized, MimicPolicy::Allow)
    }

    fn perform_with(
        &self,
        ctx: &MountContext<'_>,
        synthesized: &mut Vec<Change>,
        mimic: MimicPolicy,
    ) -> Result<()> {
        match self.action {
            Action::Keep => Ok(()),
            Action::Mount => self.mount(ctx, synthesized, mimic),
            Action::Unmount => self.unmount(ctx),
        }
    }

    fn mount(
        &self,
        ctx: &MountContext<'_>,
        synthesized: &mut Vec<Change>,
        mimic: MimicPolicy,
    ) -> Result<()> {
        let kind = self.entry.kind();

        match self.ensure_target(ctx, kind) {
            Err(UpdateError::ReadOnlyFilesystem { path }) if mimic == MimicPolicy::Allow => {
                self.make_writable(ctx, &path, synthesized)?;
                self.ensure_target(ctx, kind)?;
            }
            other => other?,
        }

        // The target itself is the whole change.
        if kind == EntryKind::Symlink {
            return Ok(());
        }

        let (flags, unparsed) = options_to_flags(&self.entry.options);
        if flags.contains(MsFlags::MS_BIND) {
            self.ensure_source(ctx, kind)?;
        }

        let data = unparsed.join(",");
        debug!(
            "mount {:?} {:?} {:?} {:?} {:?}",
            self.entry.name, self.entry.dir, self.entry.fs_type, flags, data
        );
        ctx.sys
            .mount(&self.entry.name, &self.entry.dir, &self.entry.fs_type, flags, &data)
            .map_err(|source| UpdateError::Mount {
                change: self.to_string(),
                source,
            })
    }

    fn unmount(&self, ctx: &MountContext<'_>) -> Result<()> {
        if self.entry.kind() == EntryKind::Symlink {
            return secure_remove_link(ctx.sys, &self.entry.dir);
        }

        debug!("umount {:?} UMOUNT_NOFOLLOW", self.entry.dir);
        ctx.sys
            .unmount(&self.entry.dir, MntFlags::UMOUNT_NOFOLLOW)
            .map_err(|source| UpdateError::Unmount {
                change: self.to_string(),
                source,
            })
    }

    /// Create the mount point, or the symlink that stands in for one.
    fn ensure_target(&self, ctx: &MountContext<'_>, kind: EntryKind) -> Result<()> {
        let config = ctx.config;
        let (mode, uid, gid) = (
            config.mount_point_mode,
            config.mount_point_uid,
            config.mount_point_gid,
        );
        let dir = &self.entry.dir;

        match kind {
            EntryKind::Directory => secure_mkdir_all(ctx.sys, dir, mode, uid, gid),
            EntryKind::File => secure_mkfile_all(ctx.sys, dir, mode, uid, gid),
            EntryKind::Symlink => {
                let target = self.entry.symlink_target().ok_or_else(|| {
                    UpdateError::MissingSymlinkTarget {
                        change: self.to_string(),
                    }
                })?;
                secure_mklink_all(ctx.sys, dir, target, mode, uid, gid)
            }
        }
    }

    /// Create the source of a bind mount. Sources live in writable
    /// territory, so a read-only filesystem here is an error.
    fn ensure_source(&self, ctx: &MountContext<'_>, kind: EntryKind) -> Result<()> {
        let config = ctx.config;
        let name = &self.entry.name;

        match kind {
            EntryKind::File => secure_mkfile_all(
                ctx.sys,
                name,
                config.mount_point_mode,
                config.mount_point_uid,
                config.mount_point_gid,
            ),
            _ => secure_mkdir_all(
                ctx.sys,
                name,
                config.mount_point_mode,
                config.mount_point_uid,
                config.mount_point_gid,
            ),
        }
    }

    /// Build and perform a writable mimic of `dir`, then leave the retry to
    /// the caller.
    fn make_writable(
        &self,
        ctx: &MountContext<'_>,
        dir: &Path,
        synthesized: &mut Vec<Change>,
    ) -> Result<()> {
        let dir = dir.to_string_lossy();
        let staging_dir = ctx.config.staging_dir.to_string_lossy();
        info!("Creating writable mimic of {} to perform {}", dir, self);

        for step in plan_writable_mimic(ctx.sys, &dir, &staging_dir)? {
            step.perform_with(ctx, synthesized, MimicPolicy::Forbid)?;
            synthesized.push(step);
        }
        Ok(())
    }
}
