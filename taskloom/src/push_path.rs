//! Push path: delivers queued `PendingUpdate` entries to the tracker.
//!
//! Decoupled from the orchestrator loop itself — the loop only enqueues
//! side-effects (§4.5); this module drains them through a `TrackerPort`,
//! stamping each entry `syncedAt` or `error` but never removing it.

use chrono::Utc;

use crate::context;
use crate::tracker_port::TrackerPort;
use crate::types::context::{PendingUpdateData, PendingUpdateType, SyncLogEntry};

/// Summary of one push pass.
#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub synced: usize,
    pub failed: usize,
}

fn update_type_of(data: &PendingUpdateData) -> (PendingUpdateType, String) {
    match data {
        PendingUpdateData::StatusChange { identifier, .. } => {
            (PendingUpdateType::StatusChange, identifier.clone())
        }
        PendingUpdateData::AddComment { identifier, .. } => {
            (PendingUpdateType::AddComment, identifier.clone())
        }
        PendingUpdateData::CreateSubtask { title, .. } => {
            (PendingUpdateType::CreateSubtask, title.clone())
        }
        PendingUpdateData::UpdateDescription { identifier, .. } => {
            (PendingUpdateType::UpdateDescription, identifier.clone())
        }
        PendingUpdateData::AddLabel { identifier, .. } => {
            (PendingUpdateType::AddLabel, identifier.clone())
        }
        PendingUpdateData::RemoveLabel { identifier, .. } => {
            (PendingUpdateType::RemoveLabel, identifier.clone())
        }
    }
}

/// Statuses that normalize to terminal success, for the backend-status
/// mirroring rule in §4.5.
fn is_terminal_success_status(status: &str) -> bool {
    matches!(
        status.to_lowercase().as_str(),
        "done" | "completed" | "complete" | "closed"
    )
}

/// Push every pending update for `parent_identifier` through `tracker_port`,
/// stamping each with `syncedAt` or `error` and writing one sync-log entry
/// per attempt. Delivery order matches enqueue order.
pub async fn push_pending_updates(
    parent_identifier: &str,
    tracker_port: &dyn TrackerPort,
) -> PushResult {
    let mut result = PushResult::default();
    let pending = context::list_pending_updates(parent_identifier);

    for update in pending {
        let (update_type, issue_identifier) = update_type_of(&update.data);
        let outcome = tracker_port.apply_update(&update).await;

        if outcome.success {
            let _ = context::mark_synced(parent_identifier, &update.id);
            result.synced += 1;

            if let PendingUpdateData::StatusChange { new_status, .. } = &update.data {
                if is_terminal_success_status(new_status) {
                    context::update_backend_status(parent_identifier, &issue_identifier, new_status);
                }
            }
        } else {
            let error = outcome.error.clone().unwrap_or_else(|| "unknown error".to_string());
            let _ = context::mark_failed(parent_identifier, &update.id, &error);
            result.failed += 1;
        }

        let _ = context::write_sync_log(
            parent_identifier,
            SyncLogEntry {
                timestamp: Utc::now().to_rfc3339(),
                update_id: update.id,
                update_type,
                issue_identifier,
                success: outcome.success,
                error: outcome.error,
                backend_response: None,
            },
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::context::PendingUpdateData;

    #[test]
    fn test_update_type_of_status_change() {
        let data = PendingUpdateData::StatusChange {
            issue_id: "abc".to_string(),
            identifier: "MOB-1".to_string(),
            old_status: "In Progress".to_string(),
            new_status: "Done".to_string(),
        };
        let (ty, ident) = update_type_of(&data);
        assert_eq!(ty, PendingUpdateType::StatusChange);
        assert_eq!(ident, "MOB-1");
    }

    #[test]
    fn test_is_terminal_success_status() {
        assert!(is_terminal_success_status("Done"));
        assert!(is_terminal_success_status("CLOSED"));
        assert!(!is_terminal_success_status("In Progress"));
    }
}
