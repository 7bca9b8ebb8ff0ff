use std::collections::HashMap;

use regex::Regex;

use crate::executor::{ExecutionResult, ExecutionStatus};
use crate::tracker_port::TrackerPort;
use crate::types::{Backend, SubTask};

/// Tracker statuses that normalize to a terminal-success `done`.
const DONE_STATUS_NAMES: &[&str] = &["done", "completed", "complete", "closed"];

fn backend_status_is_done(status: &str) -> bool {
    DONE_STATUS_NAMES.contains(&status.to_lowercase().as_str())
}

/// Pattern matching local-only task identifiers (`LOC-001`, `task-001`).
const LOCAL_ID_PATTERN: &str = r"^(LOC|task)-\d+$";

/// Check if an identifier looks like a local-only task (not from a backend).
///
/// Local identifiers match `LOC-NNN` or `task-NNN` patterns.
/// Backend identifiers are anything else (e.g., `MOB-123`, `PROJ-456`).
fn is_local_task_identifier(identifier: &str, _backend: Option<&Backend>) -> bool {
    let local_pattern = Regex::new(LOCAL_ID_PATTERN).unwrap();
    local_pattern.is_match(identifier)
}

/// Assignment record for tracking task execution attempts.
#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub task_id: String,
    pub identifier: String,
    pub attempts: u32,
    pub last_result: Option<ExecutionResult>,
}

/// Tracks task assignments, attempts, and retry decisions.
#[derive(Debug)]
pub struct ExecutionTracker {
    pub assignments: HashMap<String, TaskAssignment>,
    pub max_retries: u32,
    pub verification_timeout_ms: u64,
}

/// Execution result enriched with backend verification status.
#[derive(Debug, Clone)]
pub struct VerifiedResult {
    pub task_id: String,
    pub identifier: String,
    pub success: bool,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub raw_output: Option<String>,
    pub backend_verified: bool,
    pub backend_status: Option<String>,
    pub should_retry: bool,
}

impl From<&ExecutionResult> for VerifiedResult {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            identifier: result.identifier.clone(),
            success: result.success,
            status: result.status.clone(),
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            raw_output: result.raw_output.clone(),
            backend_verified: false,
            backend_status: None,
            should_retry: false,
        }
    }
}

/// Tracker statistics summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStats {
    pub total_assigned: usize,
    pub retried_tasks: usize,
    pub max_attempts_reached: usize,
}

/// Create a new execution tracker.
pub fn create_tracker(
    max_retries: Option<u32>,
    verification_timeout_ms: Option<u64>,
) -> ExecutionTracker {
    ExecutionTracker {
        assignments: HashMap::new(),
        max_retries: max_retries.unwrap_or(2),
        verification_timeout_ms: verification_timeout_ms.unwrap_or(5000),
    }
}

/// Record a task assignment (increments attempts if already assigned).
pub fn assign_task(tracker: &mut ExecutionTracker, task: &SubTask) {
    if let Some(existing) = tracker.assignments.get_mut(&task.id) {
        existing.attempts += 1;
    } else {
        tracker.assignments.insert(
            task.id.clone(),
            TaskAssignment {
                task_id: task.id.clone(),
                identifier: task.identifier.clone(),
                attempts: 1,
                last_result: None,
            },
        );
    }
}

/// Process execution results, re-verifying each reported success against
/// the tracker's server-side status before trusting it.
///
/// For local-only identifiers the agent's own report is authoritative (there
/// is no independent server to disagree with). For backend-tracked
/// identifiers, `tracker_port.fetch_status` is consulted: if the reported
/// success doesn't match a server status that normalizes to done, the
/// result is downgraded to a retry (or a permanent failure once the retry
/// budget is exhausted).
///
/// Failed results skip the backend round-trip entirely and go straight to
/// the retry-eligibility check.
pub async fn process_results(
    tracker: &mut ExecutionTracker,
    results: &[ExecutionResult],
    backend: Option<&Backend>,
    tracker_port: &dyn TrackerPort,
) -> Vec<VerifiedResult> {
    let mut verified_results = Vec::with_capacity(results.len());

    for result in results {
        let mut assignment = tracker.assignments.get_mut(&result.task_id);
        let attempts = assignment.as_ref().map(|a| a.attempts).unwrap_or(1);

        if let Some(ref mut assign) = assignment {
            assign.last_result = Some(result.clone());
        }

        let mut vr = VerifiedResult::from(result);

        if result.success {
            if is_local_task_identifier(&result.identifier, backend) {
                vr.backend_verified = true;
                vr.backend_status = Some("Done (local)".to_string());
                vr.should_retry = false;
            } else {
                match tracker_port.fetch_status(&result.identifier).await {
                    Some(status) if backend_status_is_done(&status) => {
                        vr.backend_verified = true;
                        vr.backend_status = Some(status);
                        vr.should_retry = false;
                    }
                    Some(status) => {
                        // Agent says done, server disagrees: treat as a
                        // transient disagreement and retry within budget.
                        vr.backend_verified = false;
                        vr.backend_status = Some(status);
                        vr.success = false;
                        vr.should_retry = attempts <= tracker.max_retries;
                    }
                    None => {
                        // Tracker unreachable: treated as verification
                        // disagreement, eligible for retry.
                        vr.backend_verified = false;
                        vr.backend_status = None;
                        vr.success = false;
                        vr.should_retry = attempts <= tracker.max_retries;
                    }
                }
            }
        } else {
            vr.backend_verified = false;
            vr.should_retry = attempts <= tracker.max_retries;
        }

        verified_results.push(vr);
    }

    verified_results
}

/// Get tasks that should be retried based on verified results.
pub fn get_retry_tasks<'a>(
    results: &[VerifiedResult],
    all_tasks: &'a [SubTask],
) -> Vec<&'a SubTask> {
    let retry_ids: Vec<&str> = results
        .iter()
        .filter(|r| r.should_retry)
        .map(|r| r.task_id.as_str())
        .collect();

    all_tasks
        .iter()
        .filter(|task| retry_ids.contains(&task.id.as_str()))
        .collect()
}

/// Get permanently failed tasks (failed with no retries remaining).
pub fn get_permanently_failed_tasks(results: &[VerifiedResult]) -> Vec<&VerifiedResult> {
    results
        .iter()
        .filter(|r| !r.success && !r.should_retry)
        .collect()
}

/// Check if all results succeeded and were backend-verified.
pub fn all_succeeded(results: &[VerifiedResult]) -> bool {
    results.iter().all(|r| r.success && r.backend_verified)
}

/// Check if there are any permanent failures (no retries left).
pub fn has_permanent_failures(results: &[VerifiedResult]) -> bool {
    results.iter().any(|r| !r.success && !r.should_retry)
}

/// Reset the tracker, clearing all assignments.
pub fn reset_tracker(tracker: &mut ExecutionTracker) {
    tracker.assignments.clear();
}

/// Get statistics about tracked task assignments.
pub fn get_tracker_stats(tracker: &ExecutionTracker) -> TrackerStats {
    let mut retried_tasks = 0;
    let mut max_attempts_reached = 0;

    for assignment in tracker.assignments.values() {
        if assignment.attempts > 1 {
            retried_tasks += 1;
        }
        if assignment.attempts >= tracker.max_retries {
            max_attempts_reached += 1;
        }
    }

    TrackerStats {
        total_assigned: tracker.assignments.len(),
        retried_tasks,
        max_attempts_reached,
    }
}
