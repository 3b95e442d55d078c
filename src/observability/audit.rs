/// Audit trail of mount namespace changes
///
/// Every change that reaches the kernel, including the steps of a writable
/// mimic, is emitted as one JSON record on the [`AUDIT_TARGET`] log target so
/// that it can be routed separately from diagnostic logging.
use crate::core::change::{Action, Change};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Log target carrying audit records
pub const AUDIT_TARGET: &str = "nsupdate::audit";

/// How a change came about and whether it took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOutcome {
    /// Already in place; nothing was done
    Kept,
    Performed,
    /// Performed as a precondition of another change
    Synthesized,
    Failed,
}

/// One audited change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: SystemTime,
    pub instance: String,
    pub action: Action,
    pub entry: String,
    pub outcome: ChangeOutcome,
    pub error: Option<String>,
}

impl ChangeEvent {
    pub fn new(instance: &str, change: &Change, outcome: ChangeOutcome) -> Self {
        Self {
            timestamp: SystemTime::now(),
            instance: instance.to_string(),
            action: change.action,
            entry: change.entry.to_string(),
            outcome,
            error: None,
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// The record as written to the audit target.
    pub fn to_record(&self) -> serde_json::Value {
        let mut record = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "instance": self.instance,
            "action": self.action,
            "entry": self.entry,
            "outcome": self.outcome,
            "process_id": std::process::id(),
        });
        if let Some(error) = &self.error {
            record["error"] = serde_json::json!(error);
        }
        record
    }
}

/// Emit an audit record for a change.
pub fn log_change_event(event: &ChangeEvent) {
    let record = event.to_record();
    match event.outcome {
        ChangeOutcome::Failed => error!(target: AUDIT_TARGET, "{}", record),
        _ => info!(target: AUDIT_TARGET, "{}", record),
    }
}

/// Convenience wrapper for the common case without an error.
pub fn change_event(instance: &str, change: &Change, outcome: ChangeOutcome) {
    log_change_event(&ChangeEvent::new(instance, change, outcome));
}
