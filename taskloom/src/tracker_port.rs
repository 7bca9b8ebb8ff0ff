//! Tracker Port: the narrow interface the orchestrator depends on to read
//! and mutate sub-task state in whatever issue tracker backs a run.
//!
//! The core never knows which concrete backend it is talking to; it only
//! calls `fetch_parent`, `fetch_sub_tasks`, `fetch_status`, and
//! `apply_update` against a `dyn TrackerPort`.

use async_trait::async_trait;

use crate::jira::{CreateJiraIssueOptions, JiraClient, JiraError};
use crate::linear::{CreateLinearIssueInput, LinearClient, LinearError};
use crate::local_state;
use crate::types::context::{PendingUpdate, PendingUpdateData};
use crate::types::task_graph::{LinearIssue, ParentIssue};

/// Outcome of pushing one `PendingUpdate` to the backend.
#[derive(Debug, Clone)]
pub struct ApplyUpdateResult {
    pub success: bool,
    pub error: Option<String>,
}

impl ApplyUpdateResult {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn err(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Abstract tracker operations the orchestrator core consumes.
///
/// Concrete backends (Linear, Jira, local-only) implement this; the core
/// is constructed with a `Box<dyn TrackerPort>` and never downcasts it.
#[async_trait]
pub trait TrackerPort: Send + Sync {
    async fn fetch_parent(&self, identifier: &str) -> Option<ParentIssue>;
    async fn fetch_sub_tasks(&self, parent_id: &str) -> Option<Vec<LinearIssue>>;
    async fn fetch_status(&self, identifier: &str) -> Option<String>;
    async fn apply_update(&self, update: &PendingUpdate) -> ApplyUpdateResult;
}

// ---------------------------------------------------------------------------
// Linear backend
// ---------------------------------------------------------------------------

pub struct LinearTrackerPort {
    client: LinearClient,
    team_id: String,
}

impl LinearTrackerPort {
    pub fn new(client: LinearClient, team_id: String) -> Self {
        Self { client, team_id }
    }
}

#[async_trait]
impl TrackerPort for LinearTrackerPort {
    async fn fetch_parent(&self, identifier: &str) -> Option<ParentIssue> {
        self.client.fetch_linear_issue(identifier).await.ok()
    }

    async fn fetch_sub_tasks(&self, parent_id: &str) -> Option<Vec<LinearIssue>> {
        self.client.fetch_linear_sub_tasks(parent_id).await.ok()
    }

    async fn fetch_status(&self, identifier: &str) -> Option<String> {
        self.client.fetch_linear_issue_status(identifier).await.ok()
    }

    async fn apply_update(&self, update: &PendingUpdate) -> ApplyUpdateResult {
        match &update.data {
            PendingUpdateData::StatusChange { issue_id, new_status, .. } => {
                match self.client.update_linear_issue_status(issue_id, new_status).await {
                    Ok(()) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::AddComment { issue_id, body, .. } => {
                match self.client.add_linear_comment(issue_id, body).await {
                    Ok(_) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::CreateSubtask { parent_id, title, description, blocked_by } => {
                let input = CreateLinearIssueInput {
                    team_id: self.team_id.clone(),
                    title: title.clone(),
                    description: Some(description.clone()),
                    parent_id: Some(parent_id.clone()),
                    blocked_by: blocked_by.clone().unwrap_or_default(),
                    labels: Vec::new(),
                    priority: None,
                };
                match self.client.create_linear_issue(&input).await {
                    Ok(_) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::UpdateDescription { .. }
            | PendingUpdateData::AddLabel { .. }
            | PendingUpdateData::RemoveLabel { .. } => {
                ApplyUpdateResult::err(format!(
                    "{} is not supported by the Linear tracker port",
                    update_kind(&update.data)
                ))
            }
        }
    }
}

impl From<LinearError> for ApplyUpdateResult {
    fn from(e: LinearError) -> Self {
        ApplyUpdateResult::err(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Jira backend
// ---------------------------------------------------------------------------

pub struct JiraTrackerPort {
    client: JiraClient,
    project_key: String,
}

impl JiraTrackerPort {
    pub fn new(client: JiraClient, project_key: String) -> Self {
        Self { client, project_key }
    }
}

#[async_trait]
impl TrackerPort for JiraTrackerPort {
    async fn fetch_parent(&self, identifier: &str) -> Option<ParentIssue> {
        self.client.fetch_jira_issue(identifier).await.ok()
    }

    async fn fetch_sub_tasks(&self, parent_id: &str) -> Option<Vec<LinearIssue>> {
        self.client.fetch_jira_sub_tasks(parent_id).await.ok()
    }

    async fn fetch_status(&self, identifier: &str) -> Option<String> {
        self.client.fetch_jira_issue_status(identifier).await.ok()
    }

    async fn apply_update(&self, update: &PendingUpdate) -> ApplyUpdateResult {
        match &update.data {
            PendingUpdateData::StatusChange { issue_id, new_status, .. } => {
                match self.client.update_jira_issue_status(issue_id, new_status).await {
                    Ok(()) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::AddComment { issue_id, body, .. } => {
                match self.client.add_jira_comment(issue_id, body).await {
                    Ok(_) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::CreateSubtask { parent_id, title, description, .. } => {
                let options = CreateJiraIssueOptions {
                    project_key: self.project_key.clone(),
                    issue_type_name: "Sub-task".to_string(),
                    summary: title.clone(),
                    description: Some(description.clone()),
                    parent_key: Some(parent_id.clone()),
                    labels: None,
                    assignee_id: None,
                };
                match self.client.create_jira_issue(&options).await {
                    Ok(_) => ApplyUpdateResult::ok(),
                    Err(e) => ApplyUpdateResult::err(e.to_string()),
                }
            }
            PendingUpdateData::UpdateDescription { .. }
            | PendingUpdateData::AddLabel { .. }
            | PendingUpdateData::RemoveLabel { .. } => {
                ApplyUpdateResult::err(format!(
                    "{} is not supported by the Jira tracker port",
                    update_kind(&update.data)
                ))
            }
        }
    }
}

impl From<JiraError> for ApplyUpdateResult {
    fn from(e: JiraError) -> Self {
        ApplyUpdateResult::err(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Local backend (no network, backed by `.mobius/` state on disk)
// ---------------------------------------------------------------------------

/// Tracker port over purely local state, used when `backend = local`.
///
/// `fetch_status` and `apply_update` read/write the same per-issue files
/// the rest of the local-only workflow uses, so a local run never depends
/// on Linear or Jira credentials being present.
pub struct LocalTrackerPort {
    parent_id: String,
}

impl LocalTrackerPort {
    pub fn new(parent_id: String) -> Self {
        Self { parent_id }
    }
}

#[async_trait]
impl TrackerPort for LocalTrackerPort {
    async fn fetch_parent(&self, identifier: &str) -> Option<ParentIssue> {
        local_state::read_parent_spec(identifier).map(|p| ParentIssue {
            id: p.id,
            identifier: p.identifier,
            title: p.title,
            git_branch_name: p.git_branch_name,
        })
    }

    async fn fetch_sub_tasks(&self, parent_id: &str) -> Option<Vec<LinearIssue>> {
        Some(local_state::read_local_subtasks_as_linear_issues(parent_id))
    }

    async fn fetch_status(&self, identifier: &str) -> Option<String> {
        local_state::read_subtasks(&self.parent_id)
            .into_iter()
            .find(|t| t.identifier == identifier)
            .map(|t| t.status)
    }

    async fn apply_update(&self, update: &PendingUpdate) -> ApplyUpdateResult {
        match &update.data {
            PendingUpdateData::StatusChange { identifier, new_status, .. } => {
                local_state::update_subtask_status(&self.parent_id, identifier, new_status);
                ApplyUpdateResult::ok()
            }
            PendingUpdateData::AddComment { .. } => {
                // Local runs have no comment thread to append to; recorded
                // only in the sync log by the caller.
                ApplyUpdateResult::ok()
            }
            PendingUpdateData::CreateSubtask { .. }
            | PendingUpdateData::UpdateDescription { .. }
            | PendingUpdateData::AddLabel { .. }
            | PendingUpdateData::RemoveLabel { .. } => {
                ApplyUpdateResult::err(format!(
                    "{} is not supported by the local tracker port",
                    update_kind(&update.data)
                ))
            }
        }
    }
}

fn update_kind(data: &PendingUpdateData) -> &'static str {
    match data {
        PendingUpdateData::StatusChange { .. } => "status_change",
        PendingUpdateData::AddComment { .. } => "add_comment",
        PendingUpdateData::CreateSubtask { .. } => "create_subtask",
        PendingUpdateData::UpdateDescription { .. } => "update_description",
        PendingUpdateData::AddLabel { .. } => "add_label",
        PendingUpdateData::RemoveLabel { .. } => "remove_label",
    }
}
