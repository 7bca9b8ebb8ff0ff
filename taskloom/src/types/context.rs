use serde::{Deserialize, Serialize};

use super::config::{ProjectDetectionResult, SubTaskVerifyCommand};
use super::enums::{
    Backend, PendingUpdateType, SessionStatus, SkillOutputStatus, TaskStatus, VerificationResult,
};

/// Parent issue details stored in local context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentIssueContext {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub git_branch_name: String,
    pub status: String,
    pub labels: Vec<String>,
    pub url: String,
}

/// Reference to a related issue (blocker or blocked)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRef {
    pub id: String,
    pub identifier: String,
}

/// Sub-task stored in local context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskContext {
    pub id: String,
    #[serde(default)]
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub git_branch_name: String,
    #[serde(default, deserialize_with = "deserialize_issue_refs")]
    pub blocked_by: Vec<IssueRef>,
    #[serde(default, deserialize_with = "deserialize_issue_refs")]
    pub blocks: Vec<IssueRef>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Deserialize blockedBy/blocks fields that can be either string arrays or IssueRef arrays.
///
/// Refine writes these as string arrays like `["task-002"]`, but the canonical
/// format is `[{"id": "task-002", "identifier": "task-002"}]`. This handles both.
fn deserialize_issue_refs<'de, D>(deserializer: D) -> Result<Vec<IssueRef>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrRef {
        Str(String),
        Ref(IssueRef),
    }

    let items: Vec<StringOrRef> = Vec::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            StringOrRef::Str(s) => IssueRef {
                id: s.clone(),
                identifier: s,
            },
            StringOrRef::Ref(r) => r,
        })
        .collect())
}

/// Local-only issue specification for issues not backed by Linear/Jira
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIssueSpec {
    pub local_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

/// Summary of a single execution iteration in the loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationSummary {
    pub iteration_number: u32,
    pub started_at: String,
    pub completed_at: String,
    pub tasks_completed: Vec<String>,
    pub key_changes: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Counter for generating LOC-{N} local issue identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCounter {
    pub next_task_number: u32,
    pub last_updated: String,
}

/// Metadata about the local context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetadata {
    pub fetched_at: String,
    pub updated_at: String,
    pub backend: Backend,
    pub synced_at: Option<String>,
}

/// Session information for the active working session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub parent_id: String,
    pub backend: Backend,
    pub started_at: String,
    pub worktree_path: Option<String>,
    pub status: SessionStatus,
}

/// Active task running in a pane (runtime monitoring)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeActiveTask {
    pub id: String,
    pub pid: u32,
    pub pane: String,
    pub started_at: String,
    pub worktree: Option<String>,
}

/// Completed or failed task with timing info (runtime monitoring)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCompletedTask {
    pub id: String,
    pub completed_at: String,
    pub duration: u64,
}

/// Backend status entry for tracking synced status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatusEntry {
    pub identifier: String,
    pub status: String,
    pub synced_at: String,
}

/// Runtime execution state for TUI monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub parent_id: String,
    pub parent_title: String,
    pub active_tasks: Vec<RuntimeActiveTask>,
    pub completed_tasks: Vec<serde_json::Value>,
    pub failed_tasks: Vec<serde_json::Value>,
    pub started_at: String,
    pub updated_at: String,
    pub loop_pid: Option<u32>,
    pub total_tasks: Option<u32>,
    pub backend_statuses: Option<std::collections::HashMap<String, BackendStatusEntry>>,
}

/// Complete issue context stored locally
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueContext {
    pub parent: ParentIssueContext,
    pub sub_tasks: Vec<SubTaskContext>,
    pub metadata: ContextMetadata,
    pub project_info: Option<ProjectDetectionResult>,
    pub sub_task_verify_commands: Option<Vec<SubTaskVerifyCommand>>,
}

// --- Skill Output Types ---

/// Verification results for a subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskVerificationResults {
    pub typecheck: VerificationResult,
    pub tests: VerificationResult,
    pub lint: VerificationResult,
    pub subtask_verify: Option<VerificationResult>,
}

/// Criteria result detail (used in verification needs-work output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionDetail {
    pub criterion: String,
    pub status: String,
    pub evidence: String,
}

/// Criteria results summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaResults {
    pub met: u32,
    pub total: u32,
    pub details: Vec<CriterionDetail>,
}

/// Issue detail for failing subtasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Failing subtask entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingSubtask {
    pub id: String,
    pub identifier: String,
    pub issues: Vec<SubtaskIssue>,
}

/// Feedback comment for rework loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackComment {
    pub subtask_id: String,
    pub comment: String,
}

/// Discriminated union of all skill output variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum SkillOutputData {
    #[serde(rename = "SUBTASK_COMPLETE")]
    SubtaskComplete {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: String,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        #[serde(rename = "commitHash")]
        commit_hash: String,
        #[serde(rename = "filesModified")]
        files_modified: Vec<String>,
        #[serde(rename = "verificationResults")]
        verification_results: SubtaskVerificationResults,
    },
    #[serde(rename = "SUBTASK_PARTIAL")]
    SubtaskPartial {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: String,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        #[serde(rename = "progressMade")]
        progress_made: Vec<String>,
        #[serde(rename = "remainingWork")]
        remaining_work: Vec<String>,
        #[serde(rename = "commitHash")]
        commit_hash: Option<String>,
    },
    #[serde(rename = "ALL_COMPLETE")]
    AllComplete {
        timestamp: String,
        #[serde(rename = "parentId")]
        parent_id: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
        #[serde(rename = "completedCount")]
        completed_count: u32,
    },
    #[serde(rename = "ALL_BLOCKED")]
    AllBlocked {
        timestamp: String,
        #[serde(rename = "parentId")]
        parent_id: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
        #[serde(rename = "blockedCount")]
        blocked_count: u32,
        #[serde(rename = "waitingOn")]
        waiting_on: Vec<String>,
    },
    #[serde(rename = "NO_SUBTASKS")]
    NoSubtasks {
        timestamp: String,
        #[serde(rename = "parentId")]
        parent_id: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
    },
    #[serde(rename = "VERIFICATION_FAILED")]
    VerificationFailed {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: String,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        #[serde(rename = "errorType")]
        error_type: String,
        #[serde(rename = "errorOutput")]
        error_output: String,
        #[serde(rename = "attemptedFixes")]
        attempted_fixes: Vec<String>,
        #[serde(rename = "uncommittedFiles")]
        uncommitted_files: Vec<String>,
    },
    #[serde(rename = "NEEDS_WORK")]
    NeedsWork {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        issues: Option<Vec<String>>,
        #[serde(rename = "suggestedFixes")]
        suggested_fixes: Option<Vec<String>>,
        #[serde(rename = "verificationTaskId")]
        verification_task_id: Option<String>,
        #[serde(rename = "criteriaResults")]
        criteria_results: Option<CriteriaResults>,
        #[serde(rename = "failingSubtasks")]
        failing_subtasks: Option<Vec<FailingSubtask>>,
        #[serde(rename = "reworkIteration")]
        rework_iteration: Option<u32>,
        #[serde(rename = "feedbackComments")]
        feedback_comments: Option<Vec<FeedbackComment>>,
    },
    #[serde(rename = "PASS")]
    Pass {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        details: Option<String>,
    },
    #[serde(rename = "FAIL")]
    Fail {
        timestamp: String,
        #[serde(rename = "subtaskId")]
        subtask_id: Option<String>,
        #[serde(rename = "parentId")]
        parent_id: Option<String>,
        reason: String,
        details: Option<String>,
    },
}

// --- Pending Update Types ---

/// A pending update to be synced to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PendingUpdateData {
    #[serde(rename = "status_change")]
    StatusChange {
        #[serde(rename = "issueId")]
        issue_id: String,
        identifier: String,
        #[serde(rename = "oldStatus")]
        old_status: String,
        #[serde(rename = "newStatus")]
        new_status: String,
    },
    #[serde(rename = "add_comment")]
    AddComment {
        #[serde(rename = "issueId")]
        issue_id: String,
        identifier: String,
        body: String,
    },
    #[serde(rename = "create_subtask")]
    CreateSubtask {
        #[serde(rename = "parentId")]
        parent_id: String,
        title: String,
        description: String,
        #[serde(rename = "blockedBy")]
        blocked_by: Option<Vec<String>>,
    },
    #[serde(rename = "update_description")]
    UpdateDescription {
        #[serde(rename = "issueId")]
        issue_id: String,
        identifier: String,
        description: String,
    },
    #[serde(rename = "add_label")]
    AddLabel {
        #[serde(rename = "issueId")]
        issue_id: String,
        identifier: String,
        label: String,
    },
    #[serde(rename = "remove_label")]
    RemoveLabel {
        #[serde(rename = "issueId")]
        issue_id: String,
        identifier: String,
        label: String,
    },
}

/// A pending update with metadata wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub id: String,
    pub created_at: String,
    pub synced_at: Option<String>,
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: PendingUpdateData,
}

/// Queue of pending updates waiting to be synced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdatesQueue {
    pub updates: Vec<PendingUpdate>,
    pub last_sync_attempt: Option<String>,
    pub last_sync_success: Option<String>,
}

/// Entry in the sync log for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub timestamp: String,
    pub update_id: String,
    #[serde(rename = "type")]
    pub update_type: PendingUpdateType,
    pub issue_identifier: String,
    pub success: bool,
    pub error: Option<String>,
    pub backend_response: Option<String>,
}

/// Complete sync log file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub entries: Vec<SyncLogEntry>,
}
