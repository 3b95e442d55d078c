/// Writable mimic planner
///
/// A read-only directory that must host new mount points is replaced by a
/// tmpfs that mimics its original contents. The original directory stays
/// reachable through a bind mount under the staging directory until every
/// entry has been projected back into the tmpfs.
use crate::config::types::{Result, UpdateError};
use crate::core::change::{Action, Change};
use crate::kernel::syscall::{FileKind, Syscalls};
use crate::profile::entry::{KIND_FILE_OPTION, KIND_SYMLINK_OPTION, SYMLINK_TARGET_PREFIX};
use crate::profile::MountEntry;
use crate::utils::path::{clean_path, is_same_or_descendant, join};
use log::warn;
use std::path::PathBuf;

/// Where the original contents of `dir` are kept while the mimic is built:
/// the staging directory extended with the full path of `dir`.
pub fn staging_path(staging_dir: &str, dir: &str) -> String {
    let staging_dir = clean_path(staging_dir);
    let relative = dir.trim_start_matches('/');
    if relative.is_empty() {
        staging_dir
    } else {
        join(&staging_dir, relative)
    }
}

/// Plan the changes that make `dir` writable while preserving what it
/// currently contains.
///
/// The returned changes must be performed in order. Devices, sockets and
/// FIFOs found in `dir` are not carried over.
///
/// A `dir` that contains the staging directory is refused: the tmpfs would
/// hide the kept contents before they are projected back.
pub fn plan_writable_mimic(sys: &dyn Syscalls, dir: &str, staging_dir: &str) -> Result<Vec<Change>> {
    let dir = clean_path(dir);
    let staging_dir = clean_path(staging_dir);
    if is_same_or_descendant(&staging_dir, &dir) {
        return Err(UpdateError::MimicOverStaging {
            dir: PathBuf::from(&dir),
            staging_dir: PathBuf::from(&staging_dir),
        });
    }
    let safe_keeping = staging_path(&staging_dir, &dir);

    let listing = sys.read_dir(&dir).map_err(|source| UpdateError::ReadDir {
        path: PathBuf::from(&dir),
        source,
    })?;

    let mut changes = Vec::with_capacity(listing.len() + 3);

    changes.push(Change::new(
        Action::Mount,
        MountEntry::new(&dir, &safe_keeping, "", &["bind"]),
    ));
    changes.push(Change::new(
        Action::Mount,
        MountEntry::new::<&str>("none", &dir, "tmpfs", &[]),
    ));

    for item in &listing {
        let source = join(&safe_keeping, &item.name);
        let target = join(&dir, &item.name);

        let options: Vec<String> = match item.kind {
            FileKind::File => vec!["bind".into(), "ro".into(), KIND_FILE_OPTION.into()],
            FileKind::Directory => vec!["bind".into(), "ro".into()],
            FileKind::Symlink => {
                let link_target =
                    sys.readlink(&target)
                        .map_err(|source| UpdateError::ReadLink {
                            path: PathBuf::from(&target),
                            source,
                        })?;
                vec![
                    "bind".into(),
                    "ro".into(),
                    KIND_SYMLINK_OPTION.into(),
                    format!("{}{}", SYMLINK_TARGET_PREFIX, link_target),
                ]
            }
            other => {
                warn!(
                    "Not carrying {:?} entry {} over into the writable mimic of {}",
                    other, item.name, dir
                );
                continue;
            }
        };

        changes.push(Change::new(
            Action::Mount,
            MountEntry::new(&source, &target, "", &options),
        ));
    }

    changes.push(Change::new(
        Action::Unmount,
        MountEntry::new::<&str>("none", &safe_keeping, "", &[]),
    ));

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::syscall::DirEntryInfo;
    use crate::testing::SyscallRecorder;
    use nix::errno::Errno;

    #[test]
    fn test_staging_path() {
        assert_eq!(staging_path("/tmp/.nsupdate", "/foo"), "/tmp/.nsupdate/foo");
        assert_eq!(staging_path("/tmp/.nsupdate/", "/foo/bar"), "/tmp/.nsupdate/foo/bar");
        assert_eq!(staging_path("/tmp/.nsupdate", "/"), "/tmp/.nsupdate");
    }

    #[test]
    fn test_plan_writable_mimic() {
        let sys = SyscallRecorder::new();
        sys.set_dir_listing(
            "/foo",
            vec![
                DirEntryInfo::new("file", FileKind::File),
                DirEntryInfo::new("dir", FileKind::Directory),
                DirEntryInfo::new("symlink", FileKind::Symlink),
                DirEntryInfo::new("block-dev", FileKind::BlockDevice),
                DirEntryInfo::new("char-dev", FileKind::CharDevice),
                DirEntryInfo::new("socket", FileKind::Socket),
                DirEntryInfo::new("pipe", FileKind::Fifo),
            ],
        );
        sys.set_link_target("/foo/symlink", "target");

        let changes = plan_writable_mimic(&sys, "/foo", "/tmp/.nsupdate").unwrap();
        assert_eq!(
            changes,
            vec![
                Change::new(
                    Action::Mount,
                    MountEntry::new("/foo", "/tmp/.nsupdate/foo", "", &["bind"])
                ),
                Change::new(
                    Action::Mount,
                    MountEntry::new::<&str>("none", "/foo", "tmpfs", &[])
                ),
                Change::new(
                    Action::Mount,
                    MountEntry::new(
                        "/tmp/.nsupdate/foo/file",
                        "/foo/file",
                        "",
                        &["bind", "ro", "x-nsupdate.kind=file"]
                    )
                ),
                Change::new(
                    Action::Mount,
                    MountEntry::new("/tmp/.nsupdate/foo/dir", "/foo/dir", "", &["bind", "ro"])
                ),
                Change::new(
                    Action::Mount,
                    MountEntry::new(
                        "/tmp/.nsupdate/foo/symlink",
                        "/foo/symlink",
                        "",
                        &[
                            "bind",
                            "ro",
                            "x-nsupdate.kind=symlink",
                            "x-nsupdate.symlink=target"
                        ]
                    )
                ),
                Change::new(
                    Action::Unmount,
                    MountEntry::new::<&str>("none", "/tmp/.nsupdate/foo", "", &[])
                ),
            ]
        );
        assert_eq!(
            sys.calls(),
            vec![r#"readdir "/foo""#, r#"readlink "/foo/symlink""#]
        );
    }

    #[test]
    fn test_plan_writable_mimic_of_empty_dir() {
        let sys = SyscallRecorder::new();
        sys.set_dir_listing("/empty", Vec::new());

        let changes = plan_writable_mimic(&sys, "/empty/", "/tmp/.nsupdate").unwrap();
        let actions: Vec<Action> = changes.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![Action::Mount, Action::Mount, Action::Unmount]);
        assert_eq!(changes[1].entry.dir, "/empty");
    }

    #[test]
    fn test_mimic_of_staging_ancestor_is_refused() {
        let sys = SyscallRecorder::new();
        for dir in ["/", "/tmp", "/tmp/", "/tmp/.nsupdate"] {
            let err = plan_writable_mimic(&sys, dir, "/tmp/.nsupdate").unwrap_err();
            assert!(
                matches!(err, UpdateError::MimicOverStaging { .. }),
                "{} was not refused: {}",
                dir,
                err
            );
        }
        assert!(sys.calls().is_empty());

        let err = plan_writable_mimic(&sys, "/", "/tmp/.nsupdate").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot mimic /: it contains the staging directory /tmp/.nsupdate"
        );
    }

    #[test]
    fn test_mimic_of_staging_sibling_is_planned() {
        let sys = SyscallRecorder::new();
        sys.set_dir_listing("/tmpx", Vec::new());
        assert!(plan_writable_mimic(&sys, "/tmpx", "/tmp/.nsupdate").is_ok());
    }

    #[test]
    fn test_plan_writable_mimic_readdir_error() {
        let sys = SyscallRecorder::new();
        sys.insert_fault(r#"readdir "/foo""#, Errno::EACCES);

        let err = plan_writable_mimic(&sys, "/foo", "/tmp/.nsupdate").unwrap_err();
        assert!(matches!(
            err,
            UpdateError::ReadDir {
                source: Errno::EACCES,
                ..
            }
        ));
    }

    #[test]
    fn test_plan_writable_mimic_readlink_error() {
        let sys = SyscallRecorder::new();
        sys.set_dir_listing("/foo", vec![DirEntryInfo::new("symlink", FileKind::Symlink)]);
        sys.insert_fault(r#"readlink "/foo/symlink""#, Errno::EIO);

        let err = plan_writable_mimic(&sys, "/foo", "/tmp/.nsupdate").unwrap_err();
        assert_eq!(err.to_string(), "cannot read symlink /foo/symlink: EIO: I/O error");
    }
}
