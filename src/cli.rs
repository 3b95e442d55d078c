use crate::config::types::UpdateConfig;
use crate::config::validator::{validate_config, validate_instance_name};
use crate::core::{apply_profile, ApplyReport, MountContext};
use crate::kernel::syscall::SystemCalls;
use crate::profile::MountProfile;
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Update the mount namespace of an application instance to match its
/// mount profile. Must run inside the namespace being updated.
struct Cli {
    /// Apply the per-user mount profile instead of the system-wide one
    #[arg(long)]
    user_mounts: bool,
    /// JSON configuration file overriding the built-in defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Application instance whose namespace is updated (`name` or `name_key`)
    instance: String,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    validate_instance_name(&cli.instance)?;

    let config = match &cli.config {
        Some(path) => UpdateConfig::load_from_file(path)?,
        None => UpdateConfig::default(),
    };
    validate_config(&config)?;

    if !nix::unistd::geteuid().is_root() {
        warn!("Running without root: mount changes are likely to fail");
    }

    let sys = SystemCalls;
    let ctx = MountContext::new(&sys, &config);

    let report = if cli.user_mounts {
        update_user_mounts(&ctx, &cli.instance)?
    } else {
        update_system_mounts(&ctx, &cli.instance)?
    };

    if !report.is_success() {
        for failure in &report.failures {
            eprintln!("{}", failure.error);
        }
        anyhow::bail!(
            "cannot update mount namespace of {}: {} change(s) failed",
            cli.instance,
            report.failures.len()
        );
    }

    Ok(())
}

/// Reconcile against the system-wide profile and persist what was applied.
fn update_system_mounts(ctx: &MountContext<'_>, instance: &str) -> Result<ApplyReport> {
    let desired_path = ctx.config.desired_profile_path(instance);
    let current_path = ctx.config.current_profile_path(instance);

    let desired = MountProfile::load(&desired_path)
        .with_context(|| format!("cannot load desired mount profile {}", desired_path.display()))?;
    let current = MountProfile::load(&current_path)
        .with_context(|| format!("cannot load current mount profile {}", current_path.display()))?;

    info!(
        "Updating mount namespace of {} ({} current, {} desired entries)",
        instance,
        current.entries.len(),
        desired.entries.len()
    );
    let report = apply_profile(ctx, instance, &current, &desired);

    // Saved even after failures so the next run starts from what is mounted.
    report
        .applied
        .save(&current_path)
        .with_context(|| format!("cannot save current mount profile {}", current_path.display()))?;

    Ok(report)
}

/// Apply the per-user profile. Per-user mounts are made in a fresh
/// namespace each time, so there is no current profile to track.
fn update_user_mounts(ctx: &MountContext<'_>, instance: &str) -> Result<ApplyReport> {
    let desired_path = ctx.config.desired_user_profile_path(instance);
    let desired = MountProfile::load(&desired_path).with_context(|| {
        format!("cannot load desired user mount profile {}", desired_path.display())
    })?;

    info!(
        "Applying {} user mount entries for {}",
        desired.entries.len(),
        instance
    );
    Ok(apply_profile(ctx, instance, &MountProfile::default(), &desired))
}
