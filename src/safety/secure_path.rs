/// Symlink-race-safe path construction
///
/// Paths are walked one segment at a time from a freshly opened root
/// descriptor with `O_NOFOLLOW|O_DIRECTORY`, never re-resolved from a string.
/// The less privileged application may rewrite the tree concurrently; a
/// segment swapped for a symlink between `mkdirat` and `openat` makes the
/// open fail instead of leading the walk elsewhere.
///
/// Only segments created by the walk receive the requested mode and
/// ownership. Every descriptor is closed on every exit path.
use crate::config::types::{Result, UpdateError};
use crate::kernel::syscall::{FileKind, Syscalls};
use crate::utils::path::{clean_path, join, segments};
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::UnlinkatFlags;
use std::mem::ManuallyDrop;
use std::os::fd::RawFd;
use std::path::PathBuf;

const OPEN_DIR_FLAGS: OFlag = OFlag::O_NOFOLLOW
    .union(OFlag::O_CLOEXEC)
    .union(OFlag::O_DIRECTORY);

const CREATE_FILE_FLAGS: OFlag = OFlag::O_NOFOLLOW
    .union(OFlag::O_CLOEXEC)
    .union(OFlag::O_RDWR)
    .union(OFlag::O_CREAT)
    .union(OFlag::O_EXCL);

// O_NONBLOCK keeps a planted FIFO from stalling the open.
const OPEN_EXISTING_FILE_FLAGS: OFlag = OFlag::O_NOFOLLOW
    .union(OFlag::O_CLOEXEC)
    .union(OFlag::O_NONBLOCK);

/// Exclusively owned descriptor, closed through the syscall facade on drop.
struct FdGuard<'a> {
    sys: &'a dyn Syscalls,
    fd: RawFd,
}

impl<'a> FdGuard<'a> {
    fn new(sys: &'a dyn Syscalls, fd: RawFd) -> Self {
        Self { sys, fd }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Close explicitly so that a failure reaches the caller.
    fn close(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        this.sys
            .close(this.fd)
            .map_err(|source| UpdateError::CloseDescriptor {
                fd: this.fd,
                source,
            })
    }
}

impl Drop for FdGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sys.close(self.fd) {
            warn!("cannot close descriptor {} while unwinding: {}", self.fd, e);
        }
    }
}

/// Chain of directory descriptors anchored at `/`.
///
/// Holds exactly one directory; a child is opened relative to it and the
/// parent is closed right after, so at most two descriptors are live.
struct DirChain<'a> {
    sys: &'a dyn Syscalls,
    current: FdGuard<'a>,
    prefix: String,
}

impl<'a> DirChain<'a> {
    fn open_root(sys: &'a dyn Syscalls) -> Result<Self> {
        let fd = sys
            .open("/", OPEN_DIR_FLAGS, 0)
            .map_err(|source| UpdateError::OpenRoot { source })?;
        Ok(Self {
            sys,
            current: FdGuard::new(sys, fd),
            prefix: "/".to_string(),
        })
    }

    fn fd(&self) -> RawFd {
        self.current.as_raw_fd()
    }

    fn open_child(&self, segment: &str) -> Result<FdGuard<'a>> {
        let fd = self
            .sys
            .openat(self.fd(), segment, OPEN_DIR_FLAGS, 0)
            .map_err(|source| UpdateError::OpenSegment {
                segment: segment.to_string(),
                prefix: self.prefix.clone(),
                source,
            })?;
        Ok(FdGuard::new(self.sys, fd))
    }

    fn step_into(&mut self, child: FdGuard<'a>, segment: &str) -> Result<()> {
        let parent = std::mem::replace(&mut self.current, child);
        self.prefix = join(&self.prefix, segment);
        parent.close()
    }

    /// Open an existing directory and make it current.
    fn descend(&mut self, segment: &str) -> Result<()> {
        let child = self.open_child(segment)?;
        self.step_into(child, segment)
    }

    /// Create `segment` if missing, open it and make it current.
    fn mkdir_descend(&mut self, segment: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        debug!(
            "secure-mkdir {} {:?} {:#o} {}:{} -> ...",
            self.fd(),
            segment,
            mode,
            uid,
            gid
        );

        let created = match self.sys.mkdirat(self.fd(), segment, mode) {
            Ok(()) => true,
            Err(Errno::EEXIST) => false,
            Err(Errno::EROFS) => return Err(self.read_only()),
            Err(source) => {
                return Err(UpdateError::MkdirSegment {
                    segment: segment.to_string(),
                    prefix: self.prefix.clone(),
                    source,
                })
            }
        };

        let child = self.open_child(segment)?;
        if created {
            self.sys
                .fchown(child.as_raw_fd(), uid, gid)
                .map_err(|source| UpdateError::ChownSegment {
                    segment: segment.to_string(),
                    uid,
                    gid,
                    prefix: self.prefix.clone(),
                    source,
                })?;
        }

        debug!(
            "secure-mkdir {} {:?} {:#o} {}:{} -> {}",
            self.fd(),
            segment,
            mode,
            uid,
            gid,
            child.as_raw_fd()
        );
        self.step_into(child, segment)
    }

    /// Create a regular file in the current directory unless it exists.
    fn create_file(&self, name: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        match self.sys.openat(self.fd(), name, CREATE_FILE_FLAGS, mode & 0o666) {
            Ok(fd) => {
                let file = FdGuard::new(self.sys, fd);
                self.sys
                    .fchown(fd, uid, gid)
                    .map_err(|source| UpdateError::ChownFile {
                        name: name.to_string(),
                        uid,
                        gid,
                        prefix: self.prefix.clone(),
                        source,
                    })?;
                file.close()
            }
            Err(Errno::EEXIST) => {
                // Reopen without creating to reject a symlink planted at the name.
                let fd = self
                    .sys
                    .openat(self.fd(), name, OPEN_EXISTING_FILE_FLAGS, 0)
                    .map_err(|source| self.create_file_error(name, source))?;
                let file = FdGuard::new(self.sys, fd);
                let kind = self
                    .sys
                    .fstat(fd)
                    .map_err(|source| self.create_file_error(name, source))?;
                if kind != FileKind::File {
                    return Err(UpdateError::NotRegularFile {
                        name: name.to_string(),
                        prefix: self.prefix.clone(),
                        kind: kind.to_string(),
                    });
                }
                file.close()
            }
            Err(Errno::EROFS) => Err(self.read_only()),
            Err(source) => Err(self.create_file_error(name, source)),
        }
    }

    fn create_link(&self, name: &str, target: &str) -> Result<()> {
        match self.sys.symlinkat(target, self.fd(), name) {
            Ok(()) => Ok(()),
            Err(Errno::EEXIST) => self.check_existing_link(name, target),
            Err(Errno::EROFS) => Err(self.read_only()),
            Err(source) => Err(self.create_link_error(name, target, source)),
        }
    }

    /// Accept an existing entry only if it is a symlink to `target`.
    fn check_existing_link(&self, name: &str, target: &str) -> Result<()> {
        match self.sys.readlinkat(self.fd(), name) {
            Ok(existing) if existing == target => Ok(()),
            Ok(existing) => Err(UpdateError::LinkTargetMismatch {
                name: name.to_string(),
                target: target.to_string(),
                existing,
                prefix: self.prefix.clone(),
            }),
            // Not a symlink.
            Err(Errno::EINVAL) => Err(self.create_link_error(name, target, Errno::EEXIST)),
            Err(source) => Err(self.create_link_error(name, target, source)),
        }
    }

    fn create_link_error(&self, name: &str, target: &str, source: Errno) -> UpdateError {
        UpdateError::CreateLink {
            name: name.to_string(),
            target: target.to_string(),
            prefix: self.prefix.clone(),
            source,
        }
    }

    fn remove_link(&self, name: &str) -> Result<()> {
        match self.sys.unlinkat(self.fd(), name, UnlinkatFlags::NoRemoveDir) {
            Ok(()) => Ok(()),
            Err(Errno::ENOENT) => {
                debug!("symlink {:?} in {} is already gone", name, self.prefix);
                Ok(())
            }
            Err(source) => Err(UpdateError::RemoveLink {
                name: name.to_string(),
                prefix: self.prefix.clone(),
                source,
            }),
        }
    }

    fn create_file_error(&self, name: &str, source: Errno) -> UpdateError {
        UpdateError::CreateFile {
            name: name.to_string(),
            prefix: self.prefix.clone(),
            source,
        }
    }

    fn read_only(&self) -> UpdateError {
        UpdateError::ReadOnlyFilesystem {
            path: PathBuf::from(&self.prefix),
        }
    }

    fn finish(self) -> Result<()> {
        self.current.close()
    }
}

fn absolute_clean(path: &str, what: &'static str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(UpdateError::RelativePath {
            what,
            path: PathBuf::from(path),
        });
    }
    Ok(clean_path(path))
}

/// Split a path into its parent segments and final name.
fn split_leaf<'p>(clean: &'p str, path: &str, what: &'static str) -> Result<(Vec<&'p str>, &'p str)> {
    let mut parts = segments(clean);
    let leaf = parts.pop().ok_or_else(|| UpdateError::MissingFileName {
        what,
        path: PathBuf::from(path),
    })?;
    Ok((parts, leaf))
}

/// Create every missing directory of an absolute path.
///
/// Created directories get `mode` and `uid:gid`; existing ones are left
/// untouched. A read-only filesystem is reported as
/// [`UpdateError::ReadOnlyFilesystem`] carrying the deepest existing ancestor.
pub fn secure_mkdir_all(sys: &dyn Syscalls, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let clean = absolute_clean(path, "directory")?;

    let mut chain = DirChain::open_root(sys)?;
    for segment in segments(&clean) {
        chain.mkdir_descend(segment, mode, uid, gid)?;
    }
    chain.finish()
}

/// Create the missing parent directories of an absolute path and then the
/// final component as an empty regular file, unless it already exists.
/// The file is created with `mode` stripped of execute bits.
pub fn secure_mkfile_all(sys: &dyn Syscalls, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let clean = absolute_clean(path, "file")?;
    let (parents, name) = split_leaf(&clean, path, "file")?;

    let mut chain = DirChain::open_root(sys)?;
    for segment in parents {
        chain.mkdir_descend(segment, mode, uid, gid)?;
    }
    chain.create_file(name, mode, uid, gid)?;
    chain.finish()
}

/// Create the missing parent directories of an absolute path and then a
/// symlink pointing at `target`. An existing symlink with the same target is
/// accepted; anything else already at the path is an error.
pub fn secure_mklink_all(
    sys: &dyn Syscalls,
    path: &str,
    target: &str,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let clean = absolute_clean(path, "symlink")?;
    let (parents, name) = split_leaf(&clean, path, "symlink")?;

    let mut chain = DirChain::open_root(sys)?;
    for segment in parents {
        chain.mkdir_descend(segment, mode, uid, gid)?;
    }
    chain.create_link(name, target)?;
    chain.finish()
}

/// Remove the symlink at an absolute path, walking its parents without
/// following symlinks. A missing link is not an error.
pub fn secure_remove_link(sys: &dyn Syscalls, path: &str) -> Result<()> {
    let clean = absolute_clean(path, "symlink")?;
    let (parents, name) = split_leaf(&clean, path, "symlink")?;

    let mut chain = DirChain::open_root(sys)?;
    for segment in parents {
        chain.descend(segment)?;
    }
    chain.remove_link(name)?;
    chain.finish()
}
