//! Secure path builder against the real filesystem
//!
//! The walk always starts at `/`, so the scratch directories below are
//! addressed by their absolute paths.

use nix::errno::Errno;
use nsupdate::kernel::syscall::SystemCalls;
use nsupdate::safety::{secure_mkdir_all, secure_mkfile_all, secure_mklink_all, secure_remove_link};
use nsupdate::UpdateError;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn owner() -> (u32, u32) {
    (
        nix::unistd::geteuid().as_raw(),
        nix::unistd::getegid().as_raw(),
    )
}

/// Scratch directory addressed without symlinks in its own path.
fn scratch() -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    (tmp, root)
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temporary paths are UTF-8")
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

#[test]
fn test_mkdir_all_creates_every_missing_segment() {
    let (_tmp, root) = scratch();
    let target = root.join("a").join("b").join("c");
    let (uid, gid) = owner();

    secure_mkdir_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap();

    assert!(target.is_dir());
    assert_eq!(mode_of(&root.join("a")), 0o700);
    assert_eq!(mode_of(&target), 0o700);
}

#[test]
fn test_mkdir_all_is_idempotent_and_keeps_existing_modes() {
    let (_tmp, root) = scratch();
    let existing = root.join("existing");
    fs::create_dir(&existing).unwrap();
    fs::set_permissions(&existing, fs::Permissions::from_mode(0o750)).unwrap();
    let (uid, gid) = owner();

    let target = existing.join("new");
    secure_mkdir_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap();
    secure_mkdir_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap();

    assert_eq!(mode_of(&existing), 0o750);
    assert_eq!(mode_of(&target), 0o700);
}

#[test]
fn test_mkdir_all_refuses_symlinked_segment() {
    let (_tmp, root) = scratch();
    let elsewhere = root.join("elsewhere");
    fs::create_dir(&elsewhere).unwrap();
    let link = root.join("link");
    symlink(&elsewhere, &link).unwrap();
    let (uid, gid) = owner();

    let err = secure_mkdir_all(&SystemCalls, path_str(&link.join("x")), 0o700, uid, gid)
        .unwrap_err();

    assert!(
        matches!(err, UpdateError::OpenSegment { ref segment, .. } if segment == "link"),
        "unexpected error: {}",
        err
    );
    assert!(!elsewhere.join("x").exists());
}

#[test]
fn test_mkdir_all_rejects_relative_path() {
    let (uid, gid) = owner();
    let err = secure_mkdir_all(&SystemCalls, "relative/path", 0o700, uid, gid).unwrap_err();
    assert!(matches!(err, UpdateError::RelativePath { .. }));
}

#[test]
fn test_mkfile_all_creates_file_without_execute_bits() {
    let (_tmp, root) = scratch();
    let target = root.join("dir").join("file");
    let (uid, gid) = owner();

    secure_mkfile_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap();

    assert!(target.is_file());
    assert_eq!(mode_of(&target), 0o600);
    assert_eq!(mode_of(&root.join("dir")), 0o700);
}

#[test]
fn test_mkfile_all_keeps_existing_file() {
    let (_tmp, root) = scratch();
    let target = root.join("file");
    fs::write(&target, "content").unwrap();
    let (uid, gid) = owner();

    secure_mkfile_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap();

    assert_eq!(fs::read_to_string(&target).unwrap(), "content");
}

#[test]
fn test_mkfile_all_refuses_planted_symlink() {
    let (_tmp, root) = scratch();
    let victim = root.join("victim");
    fs::write(&victim, "secret").unwrap();
    let target = root.join("file");
    symlink(&victim, &target).unwrap();
    let (uid, gid) = owner();

    let err = secure_mkfile_all(&SystemCalls, path_str(&target), 0o700, uid, gid).unwrap_err();

    assert!(
        matches!(err, UpdateError::CreateFile { source: Errno::ELOOP, .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(fs::read_to_string(&victim).unwrap(), "secret");
}

#[test]
fn test_mkfile_all_refuses_existing_directory() {
    let (_tmp, root) = scratch();
    let target = root.join("sub");
    fs::create_dir(&target).unwrap();
    let (uid, gid) = owner();

    let err = secure_mkfile_all(&SystemCalls, path_str(&target), 0o644, uid, gid).unwrap_err();

    assert!(
        matches!(err, UpdateError::NotRegularFile { ref kind, .. } if kind == "directory"),
        "unexpected error: {}",
        err
    );
    assert!(target.is_dir());
}

#[test]
fn test_mklink_all_refuses_link_to_elsewhere() {
    let (_tmp, root) = scratch();
    let link = root.join("link");
    symlink("/etc/passwd", &link).unwrap();
    let (uid, gid) = owner();

    let err = secure_mklink_all(&SystemCalls, path_str(&link), "../target", 0o700, uid, gid)
        .unwrap_err();

    assert!(
        matches!(err, UpdateError::LinkTargetMismatch { ref existing, .. } if existing == "/etc/passwd"),
        "unexpected error: {}",
        err
    );
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("/etc/passwd"));
}

#[test]
fn test_mklink_all_refuses_regular_file() {
    let (_tmp, root) = scratch();
    let path = root.join("file");
    fs::write(&path, "content").unwrap();
    let (uid, gid) = owner();

    let err = secure_mklink_all(&SystemCalls, path_str(&path), "../target", 0o700, uid, gid)
        .unwrap_err();

    assert!(
        matches!(err, UpdateError::CreateLink { source: Errno::EEXIST, .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(fs::read_to_string(&path).unwrap(), "content");
}

#[test]
fn test_mklink_all_then_remove_link() {
    let (_tmp, root) = scratch();
    let link = root.join("parent").join("link");
    let (uid, gid) = owner();

    secure_mklink_all(&SystemCalls, path_str(&link), "../target", 0o700, uid, gid).unwrap();
    // A second attempt finds the link in place.
    secure_mklink_all(&SystemCalls, path_str(&link), "../target", 0o700, uid, gid).unwrap();
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("../target"));

    secure_remove_link(&SystemCalls, path_str(&link)).unwrap();
    assert!(fs::symlink_metadata(&link).is_err());

    // Removing again is not an error.
    secure_remove_link(&SystemCalls, path_str(&link)).unwrap();
}

#[test]
fn test_remove_link_refuses_directories() {
    let (_tmp, root) = scratch();
    let dir = root.join("dir");
    fs::create_dir(&dir).unwrap();

    let err = secure_remove_link(&SystemCalls, path_str(&dir)).unwrap_err();

    assert!(matches!(err, UpdateError::RemoveLink { .. }));
    assert!(dir.is_dir());
}
