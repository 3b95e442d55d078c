//! System call facade.
//!
//! Every component that touches the filesystem or the mount table receives
//! a `&dyn Syscalls` explicitly. Production code uses [`SystemCalls`]; tests
//! substitute [`crate::testing::SyscallRecorder`], which records an exact
//! call log and injects faults.
//!
//! Paths handed to this layer are plain strings: the secure path builder
//! only ever passes `"/"` to [`Syscalls::open`] and single path segments to
//! the `*at` variants. Names the kernel reports that are not UTF-8 are
//! refused with `EILSEQ` rather than rewritten.

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::UnlinkatFlags;
use std::ffi::{CString, OsString};
use std::fmt;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::os::unix::fs::FileTypeExt;

/// Kind of a directory entry, as reported without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Socket,
    Fifo,
    Unknown,
}

impl FileKind {
    /// Kind encoded in the `S_IFMT` bits of a `st_mode`.
    pub fn from_mode(mode: libc::mode_t) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFREG => FileKind::File,
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFLNK => FileKind::Symlink,
            libc::S_IFBLK => FileKind::BlockDevice,
            libc::S_IFCHR => FileKind::CharDevice,
            libc::S_IFSOCK => FileKind::Socket,
            libc::S_IFIFO => FileKind::Fifo,
            _ => FileKind::Unknown,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::File => "regular file",
            FileKind::Directory => "directory",
            FileKind::Symlink => "symlink",
            FileKind::BlockDevice => "block device",
            FileKind::CharDevice => "character device",
            FileKind::Socket => "socket",
            FileKind::Fifo => "fifo",
            FileKind::Unknown => "file of unknown type",
        };
        f.write_str(name)
    }
}

/// One entry of a shallow directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntryInfo {
    pub fn new(name: &str, kind: FileKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// The system calls needed to reconcile a mount namespace.
pub trait Syscalls {
    fn open(&self, path: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd>;
    fn openat(&self, dirfd: RawFd, name: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd>;
    fn mkdirat(&self, dirfd: RawFd, name: &str, mode: u32) -> nix::Result<()>;
    fn symlinkat(&self, target: &str, dirfd: RawFd, name: &str) -> nix::Result<()>;
    fn unlinkat(&self, dirfd: RawFd, name: &str, flags: UnlinkatFlags) -> nix::Result<()>;
    fn fchown(&self, fd: RawFd, uid: u32, gid: u32) -> nix::Result<()>;
    fn fstat(&self, fd: RawFd) -> nix::Result<FileKind>;
    fn close(&self, fd: RawFd) -> nix::Result<()>;
    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: MsFlags,
        data: &str,
    ) -> nix::Result<()>;
    fn unmount(&self, target: &str, flags: MntFlags) -> nix::Result<()>;
    /// Shallow listing of `path`, sorted by name, without `.` and `..`.
    fn read_dir(&self, path: &str) -> nix::Result<Vec<DirEntryInfo>>;
    fn readlink(&self, path: &str) -> nix::Result<String>;
    fn readlinkat(&self, dirfd: RawFd, name: &str) -> nix::Result<String>;
}

/// Syscalls backed by the running kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCalls;

fn c_string(s: &str) -> nix::Result<CString> {
    CString::new(s).map_err(|_| Errno::EINVAL)
}

fn utf8(name: OsString) -> nix::Result<String> {
    name.into_string().map_err(|_| Errno::EILSEQ)
}

fn errno_from_io(err: std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

impl Syscalls for SystemCalls {
    fn open(&self, path: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd> {
        let path_c = c_string(path)?;
        // SAFETY: path_c is a valid NUL-terminated string for the duration of the call.
        let fd = unsafe { libc::open(path_c.as_ptr(), flags.bits(), mode as libc::c_uint) };
        Errno::result(fd)
    }

    fn openat(&self, dirfd: RawFd, name: &str, flags: OFlag, mode: u32) -> nix::Result<RawFd> {
        let name_c = c_string(name)?;
        // SAFETY: name_c outlives the call; dirfd validity is checked by the kernel.
        let fd = unsafe {
            libc::openat(dirfd, name_c.as_ptr(), flags.bits(), mode as libc::c_uint)
        };
        Errno::result(fd)
    }

    fn mkdirat(&self, dirfd: RawFd, name: &str, mode: u32) -> nix::Result<()> {
        let name_c = c_string(name)?;
        // SAFETY: name_c outlives the call.
        let rc = unsafe { libc::mkdirat(dirfd, name_c.as_ptr(), mode as libc::mode_t) };
        Errno::result(rc).map(drop)
    }

    fn symlinkat(&self, target: &str, dirfd: RawFd, name: &str) -> nix::Result<()> {
        let target_c = c_string(target)?;
        let name_c = c_string(name)?;
        // SAFETY: both strings outlive the call.
        let rc = unsafe { libc::symlinkat(target_c.as_ptr(), dirfd, name_c.as_ptr()) };
        Errno::result(rc).map(drop)
    }

    fn unlinkat(&self, dirfd: RawFd, name: &str, flags: UnlinkatFlags) -> nix::Result<()> {
        let name_c = c_string(name)?;
        let at_flags = match flags {
            UnlinkatFlags::RemoveDir => libc::AT_REMOVEDIR,
            UnlinkatFlags::NoRemoveDir => 0,
        };
        // SAFETY: name_c outlives the call.
        let rc = unsafe { libc::unlinkat(dirfd, name_c.as_ptr(), at_flags) };
        Errno::result(rc).map(drop)
    }

    fn fchown(&self, fd: RawFd, uid: u32, gid: u32) -> nix::Result<()> {
        // SAFETY: plain syscall on an integer descriptor.
        let rc = unsafe { libc::fchown(fd, uid, gid) };
        Errno::result(rc).map(drop)
    }

    fn fstat(&self, fd: RawFd) -> nix::Result<FileKind> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: the buffer is only read after fstat reported success.
        let mode = unsafe {
            Errno::result(libc::fstat(fd, stat.as_mut_ptr()))?;
            stat.assume_init().st_mode
        };
        Ok(FileKind::from_mode(mode))
    }

    fn close(&self, fd: RawFd) -> nix::Result<()> {
        // SAFETY: the caller owns fd and never uses it after this call.
        let rc = unsafe { libc::close(fd) };
        Errno::result(rc).map(drop)
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: MsFlags,
        data: &str,
    ) -> nix::Result<()> {
        let fstype = (!fstype.is_empty()).then_some(fstype);
        let data = (!data.is_empty()).then_some(data);
        nix::mount::mount(Some(source), target, fstype, flags, data)
    }

    fn unmount(&self, target: &str, flags: MntFlags) -> nix::Result<()> {
        nix::mount::umount2(target, flags)
    }

    fn read_dir(&self, path: &str) -> nix::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path).map_err(errno_from_io)? {
            let entry = entry.map_err(errno_from_io)?;
            // DirEntry::file_type does not traverse symlinks.
            let file_type = entry.file_type().map_err(errno_from_io)?;
            let kind = if file_type.is_symlink() {
                FileKind::Symlink
            } else if file_type.is_dir() {
                FileKind::Directory
            } else if file_type.is_file() {
                FileKind::File
            } else if file_type.is_block_device() {
                FileKind::BlockDevice
            } else if file_type.is_char_device() {
                FileKind::CharDevice
            } else if file_type.is_socket() {
                FileKind::Socket
            } else if file_type.is_fifo() {
                FileKind::Fifo
            } else {
                FileKind::Unknown
            };
            entries.push(DirEntryInfo {
                name: utf8(entry.file_name())?,
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn readlink(&self, path: &str) -> nix::Result<String> {
        utf8(nix::fcntl::readlink(path)?)
    }

    fn readlinkat(&self, dirfd: RawFd, name: &str) -> nix::Result<String> {
        let name_c = c_string(name)?;
        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        // SAFETY: buf is valid for buf.len() bytes and name_c outlives the call.
        let len = unsafe {
            libc::readlinkat(dirfd, name_c.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };
        buf.truncate(Errno::result(len)? as usize);
        String::from_utf8(buf).map_err(|_| Errno::EILSEQ)
    }
}
