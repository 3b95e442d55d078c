/// Core types and error taxonomy for nsupdate
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Runtime configuration for a namespace update
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Directory under which read-only directories are kept while a
    /// writable mimic is constructed over them
    pub staging_dir: PathBuf,
    /// Mode of mount points created on demand
    pub mount_point_mode: u32,
    /// Owner of mount points created on demand
    pub mount_point_uid: u32,
    /// Group of mount points created on demand
    pub mount_point_gid: u32,
    /// Directory holding the desired (policy) profiles
    pub policy_dir: PathBuf,
    /// Directory holding the profiles that are currently applied
    pub runtime_dir: PathBuf,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("/tmp/.nsupdate"),
            mount_point_mode: 0o755,
            mount_point_uid: 0,
            mount_point_gid: 0,
            policy_dir: PathBuf::from("/var/lib/nsupdate/mount"),
            runtime_dir: PathBuf::from("/run/nsupdate/ns"),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            UpdateError::Config(format!(
                "Failed to parse config JSON {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Desired system-wide profile of an instance
    pub fn desired_profile_path(&self, instance: &str) -> PathBuf {
        self.policy_dir.join(format!("{}.fstab", instance))
    }

    /// Desired per-user profile of an instance
    pub fn desired_user_profile_path(&self, instance: &str) -> PathBuf {
        self.policy_dir.join(format!("{}.user-fstab", instance))
    }

    /// Profile describing what is currently applied for an instance
    pub fn current_profile_path(&self, instance: &str) -> PathBuf {
        self.runtime_dir.join(format!("{}.fstab", instance))
    }
}

/// Error types for namespace updates
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("cannot create {what} with relative path: {path:?}")]
    RelativePath { what: &'static str, path: PathBuf },

    #[error("cannot create {what} without a file name: {path:?}")]
    MissingFileName { what: &'static str, path: PathBuf },

    #[error("cannot operate on read-only filesystem at {}", path.display())]
    ReadOnlyFilesystem { path: PathBuf },

    #[error("cannot open root directory: {source}")]
    OpenRoot { source: Errno },

    #[error("cannot mkdir path segment {segment:?} (got up to {prefix:?}): {source}")]
    MkdirSegment {
        segment: String,
        prefix: String,
        source: Errno,
    },

    #[error("cannot open path segment {segment:?} (got up to {prefix:?}): {source}")]
    OpenSegment {
        segment: String,
        prefix: String,
        source: Errno,
    },

    #[error("cannot chown path segment {segment:?} to {uid}.{gid} (got up to {prefix:?}): {source}")]
    ChownSegment {
        segment: String,
        uid: u32,
        gid: u32,
        prefix: String,
        source: Errno,
    },

    #[error("cannot open file {name:?} (got up to {prefix:?}): {source}")]
    CreateFile {
        name: String,
        prefix: String,
        source: Errno,
    },

    #[error("cannot use {name:?} as a file (got up to {prefix:?}): existing entry is a {kind}")]
    NotRegularFile {
        name: String,
        prefix: String,
        kind: String,
    },

    #[error("cannot chown file {name:?} to {uid}.{gid} (got up to {prefix:?}): {source}")]
    ChownFile {
        name: String,
        uid: u32,
        gid: u32,
        prefix: String,
        source: Errno,
    },

    #[error("cannot create symlink {name:?} -> {target:?} (got up to {prefix:?}): {source}")]
    CreateLink {
        name: String,
        target: String,
        prefix: String,
        source: Errno,
    },

    #[error("cannot create symlink {name:?} -> {target:?} (got up to {prefix:?}): existing symlink points to {existing:?}")]
    LinkTargetMismatch {
        name: String,
        target: String,
        existing: String,
        prefix: String,
    },

    #[error("cannot remove symlink {name:?} (got up to {prefix:?}): {source}")]
    RemoveLink {
        name: String,
        prefix: String,
        source: Errno,
    },

    #[error("cannot close descriptor {fd}: {source}")]
    CloseDescriptor { fd: RawFd, source: Errno },

    #[error("cannot process mount change, unknown action: {action:?}")]
    UnknownAction { action: String },

    #[error("cannot perform {change}: {source}")]
    Mount { change: String, source: Errno },

    #[error("cannot perform {change}: {source}")]
    Unmount { change: String, source: Errno },

    #[error("cannot perform {change}: symlink target is not recorded")]
    MissingSymlinkTarget { change: String },

    #[error("cannot mimic {}: it contains the staging directory {}", dir.display(), staging_dir.display())]
    MimicOverStaging { dir: PathBuf, staging_dir: PathBuf },

    #[error("cannot list directory {}: {source}", path.display())]
    ReadDir { path: PathBuf, source: Errno },

    #[error("cannot read symlink {}: {source}", path.display())]
    ReadLink { path: PathBuf, source: Errno },

    #[error("invalid mount profile {}:{line}: {reason}", path.display())]
    Profile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Ancestor directory that must become writable before the failed
    /// operation can be retried.
    pub fn read_only_path(&self) -> Option<&Path> {
        match self {
            UpdateError::ReadOnlyFilesystem { path } => Some(path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpdateConfig::default();
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/.nsupdate"));
        assert_eq!(config.mount_point_mode, 0o755);
        assert_eq!(config.mount_point_uid, 0);
        assert_eq!(config.mount_point_gid, 0);
    }

    #[test]
    fn test_profile_paths() {
        let config = UpdateConfig::default();
        assert_eq!(
            config.desired_profile_path("foo"),
            PathBuf::from("/var/lib/nsupdate/mount/foo.fstab")
        );
        assert_eq!(
            config.desired_user_profile_path("foo"),
            PathBuf::from("/var/lib/nsupdate/mount/foo.user-fstab")
        );
        assert_eq!(
            config.current_profile_path("foo"),
            PathBuf::from("/run/nsupdate/ns/foo.fstab")
        );
    }

    #[test]
    fn test_partial_config_json_uses_defaults() {
        let config: UpdateConfig =
            serde_json::from_str(r#"{"staging_dir": "/run/stage"}"#).unwrap();
        assert_eq!(config.staging_dir, PathBuf::from("/run/stage"));
        assert_eq!(config.policy_dir, UpdateConfig::default().policy_dir);
    }

    #[test]
    fn test_error_messages() {
        let err = UpdateError::RelativePath {
            what: "directory",
            path: PathBuf::from("rel/path"),
        };
        assert_eq!(
            err.to_string(),
            r#"cannot create directory with relative path: "rel/path""#
        );

        let err = UpdateError::ReadOnlyFilesystem {
            path: PathBuf::from("/rofs"),
        };
        assert_eq!(err.to_string(), "cannot operate on read-only filesystem at /rofs");
        assert_eq!(err.read_only_path(), Some(Path::new("/rofs")));

        let err = UpdateError::ChownSegment {
            segment: "path".to_string(),
            uid: 123,
            gid: 456,
            prefix: "/".to_string(),
            source: Errno::EPERM,
        };
        assert!(err
            .to_string()
            .starts_with(r#"cannot chown path segment "path" to 123.456 (got up to "/"): "#));
        assert_eq!(err.read_only_path(), None);
    }
}
