/// Mount profiles: ordered lists of mount entries
use crate::config::types::{Result, UpdateError};
use crate::profile::entry::MountEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

/// An ordered sequence of mount entries, either observed or desired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountProfile {
    pub entries: Vec<MountEntry>,
}

impl MountProfile {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse fstab-style text. Blank lines and `#` comments are skipped.
    /// `origin` is only used for error reporting.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = MountEntry::parse_line(line).map_err(|reason| UpdateError::Profile {
                path: origin.to_path_buf(),
                line: index + 1,
                reason,
            })?;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Load a profile from disk. A missing file is an empty profile.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Profile {} does not exist, using empty profile", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(UpdateError::Io(e)),
        }
    }

    /// Save the profile, replacing the file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| UpdateError::Config(format!("Invalid profile path: {}", path.display())))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(self.to_string().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        log::debug!("Saved {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

impl fmt::Display for MountProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
