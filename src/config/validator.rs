// Config validation
// Startup validation of the update configuration: fail fast with actionable errors
// before any path is created or any mount is touched.

use crate::config::types::{Result, UpdateConfig, UpdateError};
use std::path::Path;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup. Errors are fatal, warnings are logged.
pub fn validate_config(config: &UpdateConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_paths(config, &mut result);
    validate_mount_points(config, &mut result);

    for warning in &result.warnings {
        log::warn!("Config warning: {}", warning);
    }

    if !result.is_valid() {
        return Err(UpdateError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn require_absolute(name: &str, path: &Path, result: &mut ValidationResult) {
    if !path.is_absolute() {
        result.add_error(format!("{} must be absolute path: {:?}", name, path));
    }
}

/// Validate paths
fn validate_paths(config: &UpdateConfig, result: &mut ValidationResult) {
    require_absolute("staging_dir", &config.staging_dir, result);
    require_absolute("policy_dir", &config.policy_dir, result);
    require_absolute("runtime_dir", &config.runtime_dir, result);

    if config.staging_dir == Path::new("/") {
        result.add_error("staging_dir cannot be the root directory".to_string());
    }

    // Staging under the policy directory would expose kept-aside content to policy readers.
    if config.staging_dir.starts_with(&config.policy_dir) {
        result.add_warning(format!(
            "staging_dir {:?} is inside policy_dir {:?}",
            config.staging_dir, config.policy_dir
        ));
    }
}

/// Validate mount point creation parameters
fn validate_mount_points(config: &UpdateConfig, result: &mut ValidationResult) {
    if config.mount_point_mode & !0o7777 != 0 {
        result.add_error(format!(
            "mount_point_mode {:#o} has bits outside 0o7777",
            config.mount_point_mode
        ));
    }

    if config.mount_point_mode & 0o700 != 0o700 {
        result.add_warning(format!(
            "mount_point_mode {:#o} does not grant the owner full access",
            config.mount_point_mode
        ));
    }

    if config.mount_point_mode & 0o002 != 0 {
        result.add_warning(format!(
            "mount_point_mode {:#o} creates world-writable mount points",
            config.mount_point_mode
        ));
    }
}

/// Validate an application instance name: `name` or `name_key`.
///
/// The name is 2 to 40 characters of lowercase letters, digits and single
/// inner hyphens and contains at least one letter. The optional instance
/// key is 1 to 10 lowercase letters or digits. Instance names end up in
/// profile file names, so anything else is rejected.
pub fn validate_instance_name(instance: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(UpdateError::Config(format!(
            "invalid instance name {:?}: {}",
            instance, reason
        )))
    };

    let (name, key) = match instance.split_once('_') {
        Some((name, key)) => (name, Some(key)),
        None => (instance, None),
    };

    if name.len() < 2 || name.len() > 40 {
        return invalid("name must be between 2 and 40 characters long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("name may only contain lowercase letters, digits and hyphens");
    }
    if !name.chars().any(|c| c.is_ascii_lowercase()) {
        return invalid("name must contain at least one letter");
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return invalid("hyphens must separate letters or digits");
    }

    if let Some(key) = key {
        if key.is_empty() || key.len() > 10 {
            return invalid("instance key must be between 1 and 10 characters long");
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return invalid("instance key may only contain lowercase letters and digits");
        }
    }

    Ok(())
}
