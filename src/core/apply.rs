/// Profile application
///
/// Performs the changes computed by the differ one after another. A failed
/// change is logged and recorded but does not stop the remaining ones; the
/// caller decides what a failure means for the run as a whole.
use crate::config::types::UpdateError;
use crate::core::change::{Action, Change, MountContext};
use crate::core::differ::needed_changes;
use crate::observability::audit::{change_event, log_change_event, ChangeEvent, ChangeOutcome};
use crate::profile::{MountEntry, MountProfile};
use log::{info, warn};

/// A change that could not be performed
#[derive(Debug)]
pub struct ChangeFailure {
    pub change: Change,
    pub error: UpdateError,
}

/// Outcome of applying a desired profile
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// What is mounted once every change has been attempted
    pub applied: MountProfile,
    /// Changes that took effect, synthesized ones included, in order
    pub performed: Vec<Change>,
    pub failures: Vec<ChangeFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, change: Change) {
        match change.action {
            Action::Keep | Action::Mount => self.applied.entries.push(change.entry.clone()),
            Action::Unmount => forget_mount(&mut self.applied.entries, &change.entry),
        }
        if change.action != Action::Keep {
            self.performed.push(change);
        }
    }
}

/// Drop the most recent entry mounted at the same directory.
fn forget_mount(entries: &mut Vec<MountEntry>, unmounted: &MountEntry) {
    if let Some(index) = entries.iter().rposition(|e| e.dir == unmounted.dir) {
        entries.remove(index);
    }
}

/// Bring the mount namespace from `current` to `desired`.
pub fn apply_profile(
    ctx: &MountContext<'_>,
    instance: &str,
    current: &MountProfile,
    desired: &MountProfile,
) -> ApplyReport {
    let changes = needed_changes(current, desired);
    let mut report = ApplyReport::default();

    for change in changes {
        let mut synthesized = Vec::new();
        let result = change.perform(ctx, &mut synthesized);

        for extra in synthesized {
            change_event(instance, &extra, ChangeOutcome::Synthesized);
            report.record(extra);
        }

        match result {
            Ok(()) => {
                let outcome = if change.action == Action::Keep {
                    ChangeOutcome::Kept
                } else {
                    info!("Performed {}", change);
                    ChangeOutcome::Performed
                };
                change_event(instance, &change, outcome);
                report.record(change);
            }
            Err(error) => {
                warn!("Cannot change mount namespace of {}: {}", instance, error);
                log_change_event(
                    &ChangeEvent::new(instance, &change, ChangeOutcome::Failed)
                        .with_error(error.to_string()),
                );
                // A mount that failed to go away is still there.
                if change.action == Action::Unmount {
                    report.applied.entries.push(change.entry.clone());
                }
                report.failures.push(ChangeFailure { change, error });
            }
        }
    }

    info!(
        "Applied profile of {}: {} changes performed, {} failed",
        instance,
        report.performed.len(),
        report.failures.len()
    );
    report
}
