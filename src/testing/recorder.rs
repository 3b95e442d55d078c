/// Recording syscall double
///
/// Implements [`Syscalls`] without touching the system. Each call is
/// appended to a log as one canonical line, descriptors are handed out the
/// way the kernel does (lowest free number, starting at 3) and faults can be
/// injected per call line. Tests assert on the exact log and call
/// [`SyscallRecorder::check_for_stray_descriptors`] to prove nothing leaked.
use crate::kernel::syscall::{DirEntryInfo, FileKind, Syscalls};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::UnlinkatFlags;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::os::fd::RawFd;

const FIRST_FD: RawFd = 3;

#[derive(Clone, Copy)]
struct Fault {
    errno: Errno,
    once: bool,
}

#[derive(Default)]
struct RecorderState {
    calls: Vec<String>,
    faults: HashMap<String, Fault>,
    open_fds: BTreeSet<RawFd>,
    fd_kinds: HashMap<RawFd, FileKind>,
    entry_kinds: HashMap<String, FileKind>,
    listings: HashMap<String, Vec<DirEntryInfo>>,
    links: HashMap<String, String>,
    links_at: HashMap<String, String>,
}

/// Syscall double that records calls and injects faults
#[derive(Default)]
pub struct SyscallRecorder {
    state: RefCell<RecorderState>,
}

impl SyscallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call whose log line equals `call` fail with `errno`.
    pub fn insert_fault(&self, call: &str, errno: Errno) {
        self.state
            .borrow_mut()
            .faults
            .insert(call.to_string(), Fault { errno, once: false });
    }

    /// Make only the next call whose log line equals `call` fail.
    pub fn insert_fault_once(&self, call: &str, errno: Errno) {
        self.state
            .borrow_mut()
            .faults
            .insert(call.to_string(), Fault { errno, once: true });
    }

    /// Canned result for `read_dir(path)`.
    pub fn set_dir_listing(&self, path: &str, entries: Vec<DirEntryInfo>) {
        self.state
            .borrow_mut()
            .listings
            .insert(path.to_string(), entries);
    }

    /// Canned result for `readlink(path)`.
    pub fn set_link_target(&self, path: &str, target: &str) {
        self.state
            .borrow_mut()
            .links
            .insert(path.to_string(), target.to_string());
    }

    /// Kind reported by `fstat` for descriptors opened at `name`.
    ///
    /// Without it, directory opens report a directory and other opens a
    /// regular file.
    pub fn set_entry_kind(&self, name: &str, kind: FileKind) {
        self.state
            .borrow_mut()
            .entry_kinds
            .insert(name.to_string(), kind);
    }

    /// Canned result for `readlinkat(_, name)`. Names without one are not
    /// symlinks.
    pub fn set_link_target_at(&self, name: &str, target: &str) {
        self.state
            .borrow_mut()
            .links_at
            .insert(name.to_string(), target.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn open_descriptors(&self) -> Vec<RawFd> {
        self.state.borrow().open_fds.iter().copied().collect()
    }

    /// Panic if any descriptor handed out was never closed.
    pub fn check_for_stray_descriptors(&self) {
        let open = self.open_descriptors();
        assert!(open.is_empty(), "unclosed file descriptors: {:?}", open);
    }

    /// Record `call` and return the injected fault for it, if any.
    fn record(&self, call: String) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        let fault = state.faults.get(&call).copied();
        if fault.is_some_and(|f| f.once) {
            state.faults.remove(&call);
        }
        state.calls.push(call);
        match fault {
            Some(fault) => Err(fault.errno),
            None => Ok(()),
        }
    }

    fn allocate_fd(&self, name: &str, flags: OFlag) -> RawFd {
        let mut state = self.state.borrow_mut();
        let fd = (FIRST_FD..)
            .find(|fd| !state.open_fds.contains(fd))
            .unwrap_or(FIRST_FD);
        let kind = match state.entry_kinds.get(name) {
            Some(kind) => *kind,
            None if flags.contains(OFlag::O_DIRECTORY) => FileKind::Directory,
            None => FileKind::File,
        };
        state.open_fds.insert(fd);
        state.fd_kinds.insert(fd, kind);
        fd
    }

    fn require_open(&self, fd: RawFd) -> nix::Result<()> {
        if self.state.borrow().open_fds.contains(&fd) {
            Ok(())
        } else {
            Err(Errno::EBADF)
        }
    }
}

/// Render open(2) flags in a fixed order, e.g. `O_NOFOLLOW|O_CLOEXEC|O_DIRECTORY`.
pub fn format_open_flags(flags: OFlag) -> String {
    const NAMES: &[(OFlag, &str)] = &[
        (OFlag::O_NOFOLLOW, "O_NOFOLLOW"),
        (OFlag::O_CLOEXEC, "O_CLOEXEC"),
        (OFlag::O_DIRECTORY, "O_DIRECTORY"),
        (OFlag::O_PATH, "O_PATH"),
        (OFlag::O_NONBLOCK, "O_NONBLOCK"),
        (OFlag::O_RDWR, "O_RDWR"),
        (OFlag::O_WRONLY, "O_WRONLY"),
        (OFlag::O_CREAT, "O_CREAT"),
        (OFlag::O_EXCL, "O_EXCL"),
        (OFlag::O_TRUNC, "O_TRUNC"),
    ];
    join_flag_names(NAMES.iter().filter(|(flag, _)| flags.contains(*flag)), "O_RDONLY")
}

/// Render mount(2) flags in a fixed order, e.g. `MS_BIND|MS_RDONLY`.
pub fn format_mount_flags(flags: MsFlags) -> String {
    const NAMES: &[(MsFlags, &str)] = &[
        (MsFlags::MS_BIND, "MS_BIND"),
        (MsFlags::MS_REC, "MS_REC"),
        (MsFlags::MS_MOVE, "MS_MOVE"),
        (MsFlags::MS_REMOUNT, "MS_REMOUNT"),
        (MsFlags::MS_RDONLY, "MS_RDONLY"),
        (MsFlags::MS_NOSUID, "MS_NOSUID"),
        (MsFlags::MS_NODEV, "MS_NODEV"),
        (MsFlags::MS_NOEXEC, "MS_NOEXEC"),
        (MsFlags::MS_SYNCHRONOUS, "MS_SYNCHRONOUS"),
        (MsFlags::MS_DIRSYNC, "MS_DIRSYNC"),
        (MsFlags::MS_MANDLOCK, "MS_MANDLOCK"),
        (MsFlags::MS_NOATIME, "MS_NOATIME"),
        (MsFlags::MS_NODIRATIME, "MS_NODIRATIME"),
        (MsFlags::MS_RELATIME, "MS_RELATIME"),
        (MsFlags::MS_STRICTATIME, "MS_STRICTATIME"),
        (MsFlags::MS_SILENT, "MS_SILENT"),
    ];
    join_flag_names(NAMES.iter().filter(|(flag, _)| flags.contains(*flag)), "0")
}

fn join_flag_names<'a, T: 'a>(
    names: impl Iterator<Item = &'a (T, &'static str)>,
    empty: &str,
) -> String {
    let joined = names.map(|(_, name)| *name).collect::<Vec<_>>().join("|");
    if joined.is_empty() {
        empty.to_string()
    } else {
        joined
    }
}

fn format_umount_flags(flags: MntFlags) -> String {
    let mut names = Vec::new();
    if flags.contains(MntFlags::MNT_FORCE) {
        names.push("MNT_FORCE");
    }
    if flags.contains(MntFlags::MNT_DETACH) {
        names.push("MNT_DETACH");
    }
    if flags.contains(MntFlags::MNT_EXPIRE) {
        names.push("MNT_EXPIRE");
    }
    if flags.contains(MntFlags::UMOUNT_NOFOLLOW) {
        names.push("UMOUNT_NOFOLLOW");
    }
    if names.is_empty() {
        "0".to_string()
    } else {
        names.join("|")
    }
}

impl Syscalls for SyscallRecorder {
    fn open(&self, path: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd> {
        self.record(format!(
            "open {:?} {} {:#o}",
            path,
            format_open_flags(flags),
            mode
        ))?;
        Ok(self.allocate_fd(path, flags))
    }

    fn openat(&self, dirfd: RawFd, name: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd> {
        self.record(format!(
            "openat {} {:?} {} {:#o}",
            dirfd,
            name,
            format_open_flags(flags),
            mode
        ))?;
        self.require_open(dirfd)?;
        Ok(self.allocate_fd(name, flags))
    }

    fn mkdirat(&self, dirfd: RawFd, name: &str, mode: u32) -> nix::Result<()> {
        self.record(format!("mkdirat {} {:?} {:#o}", dirfd, name, mode))?;
        self.require_open(dirfd)
    }

    fn symlinkat(&self, target: &str, dirfd: RawFd, name: &str) -> nix::Result<()> {
        self.record(format!("symlinkat {:?} {} {:?}", target, dirfd, name))?;
        self.require_open(dirfd)
    }

    fn unlinkat(&self, dirfd: RawFd, name: &str, flags: UnlinkatFlags) -> nix::Result<()> {
        let flags = match flags {
            UnlinkatFlags::RemoveDir => "AT_REMOVEDIR",
            UnlinkatFlags::NoRemoveDir => "0",
        };
        self.record(format!("unlinkat {} {:?} {}", dirfd, name, flags))?;
        self.require_open(dirfd)
    }

    fn fchown(&self, fd: RawFd, uid: u32, gid: u32) -> nix::Result<()> {
        self.record(format!("fchown {} {} {}", fd, uid, gid))?;
        self.require_open(fd)
    }

    fn fstat(&self, fd: RawFd) -> nix::Result<FileKind> {
        self.record(format!("fstat {}", fd))?;
        self.require_open(fd)?;
        self.state
            .borrow()
            .fd_kinds
            .get(&fd)
            .copied()
            .ok_or(Errno::EBADF)
    }

    fn close(&self, fd: RawFd) -> nix::Result<()> {
        let result = self.record(format!("close {}", fd));
        // The kernel releases the descriptor even when close reports an error.
        let was_open = self.state.borrow_mut().open_fds.remove(&fd);
        result?;
        if was_open {
            Ok(())
        } else {
            Err(Errno::EBADF)
        }
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: MsFlags,
        data: &str,
    ) -> nix::Result<()> {
        self.record(format!(
            "mount {:?} {:?} {:?} {} {:?}",
            source,
            target,
            fstype,
            format_mount_flags(flags),
            data
        ))
    }

    fn unmount(&self, target: &str, flags: MntFlags) -> nix::Result<()> {
        self.record(format!("unmount {:?} {}", target, format_umount_flags(flags)))
    }

    fn read_dir(&self, path: &str) -> nix::Result<Vec<DirEntryInfo>> {
        self.record(format!("readdir {:?}", path))?;
        self.state
            .borrow()
            .listings
            .get(path)
            .cloned()
            .ok_or(Errno::ENOENT)
    }

    fn readlink(&self, path: &str) -> nix::Result<String> {
        self.record(format!("readlink {:?}", path))?;
        self.state
            .borrow()
            .links
            .get(path)
            .cloned()
            .ok_or(Errno::EINVAL)
    }

    fn readlinkat(&self, dirfd: RawFd, name: &str) -> nix::Result<String> {
        self.record(format!("readlinkat {} {:?}", dirfd, name))?;
        self.require_open(dirfd)?;
        self.state
            .borrow()
            .links_at
            .get(name)
            .cloned()
            .ok_or(Errno::EINVAL)
    }
}
