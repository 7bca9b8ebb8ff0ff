use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::enums::{Model, TaskStatus};

/// Linear issue data structure (subset of what Linear returns)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearIssue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub git_branch_name: String,
    #[serde(default)]
    pub relations: Option<Relations>,
}

/// Blocking relations for an issue, as reported by a tracker backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relations {
    #[serde(default)]
    pub blocked_by: Vec<Relation>,
    #[serde(default)]
    pub blocks: Vec<Relation>,
}

/// A single relation reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub identifier: String,
}

/// The parent issue a task graph hangs off of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentIssue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub git_branch_name: String,
}

/// Complexity/risk scoring attached to a sub-task, used to pick a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskScoring {
    pub complexity: u32,
    pub risk: u32,
    pub recommended_model: Model,
    #[serde(default)]
    pub rationale: String,
}

/// A node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub git_branch_name: String,
    #[serde(default)]
    pub scoring: Option<TaskScoring>,
}

/// The dependency graph for one parent issue's sub-tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub parent_id: String,
    pub parent_identifier: String,
    pub tasks: HashMap<String, SubTask>,
}

/// Aggregate counts over a task graph's statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total: usize,
    pub done: usize,
    pub ready: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub failed: usize,
}

fn normalize_status(raw: &str) -> TaskStatus {
    match raw.trim().to_lowercase().as_str() {
        "done" | "completed" | "complete" | "closed" => TaskStatus::Done,
        "in progress" | "in_progress" | "started" | "doing" => TaskStatus::InProgress,
        "failed" | "cancelled" | "canceled" => TaskStatus::Failed,
        "blocked" => TaskStatus::Blocked,
        "ready" | "todo" | "backlog" => TaskStatus::Ready,
        _ => TaskStatus::Pending,
    }
}

/// A task is recognized as the graph's verification gate by title alone.
pub fn is_verification_gate(title: &str) -> bool {
    title.to_lowercase().contains("verification gate")
}

/// Recompute the derived status (ready vs. blocked) of every task whose
/// status isn't explicitly controlled (done/in_progress/failed keep their
/// value). A task is ready once every id in `blocked_by` is either absent
/// from the graph (an external/unknown blocker, treated as resolved) or
/// points at a task that is `Done`.
fn relax_derived_statuses(tasks: &mut HashMap<String, SubTask>) {
    let resolved: HashMap<String, bool> = tasks
        .iter()
        .map(|(id, t)| (id.clone(), t.status == TaskStatus::Done))
        .collect();

    for task in tasks.values_mut() {
        if matches!(task.status, TaskStatus::Pending | TaskStatus::Blocked) {
            let unresolved = task
                .blocked_by
                .iter()
                .any(|dep| matches!(resolved.get(dep), Some(false)));
            task.status = if unresolved {
                TaskStatus::Blocked
            } else {
                TaskStatus::Ready
            };
        }
    }
}

/// Build a task graph from a flat list of tracker issues, deriving `blocks`
/// as the inverse of every task's `blocked_by` and resolving each task's
/// initial ready/blocked status.
pub fn build_task_graph(parent_id: &str, parent_identifier: &str, issues: &[LinearIssue]) -> TaskGraph {
    let mut tasks: HashMap<String, SubTask> = HashMap::with_capacity(issues.len());

    for issue in issues {
        let blocked_by = issue
            .relations
            .as_ref()
            .map(|r| r.blocked_by.iter().map(|rel| rel.id.clone()).collect())
            .unwrap_or_default();

        tasks.insert(
            issue.id.clone(),
            SubTask {
                id: issue.id.clone(),
                identifier: issue.identifier.clone(),
                title: issue.title.clone(),
                status: normalize_status(&issue.status),
                blocked_by,
                blocks: Vec::new(),
                git_branch_name: issue.git_branch_name.clone(),
                scoring: None,
            },
        );
    }

    let mut blocks: HashMap<String, Vec<String>> = HashMap::new();
    for task in tasks.values() {
        for dep in &task.blocked_by {
            blocks.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }
    for (id, blocked_ids) in blocks {
        if let Some(task) = tasks.get_mut(&id) {
            task.blocks = blocked_ids;
        }
    }

    relax_derived_statuses(&mut tasks);

    TaskGraph {
        parent_id: parent_id.to_string(),
        parent_identifier: parent_identifier.to_string(),
        tasks,
    }
}

fn sorted_by_identifier(mut tasks: Vec<&SubTask>) -> Vec<SubTask> {
    tasks.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    tasks.into_iter().cloned().collect()
}

/// Tasks that can be dispatched right now: `Ready` or already `InProgress`.
pub fn get_ready_tasks(graph: &TaskGraph) -> Vec<SubTask> {
    let filtered = graph
        .tasks
        .values()
        .filter(|t| matches!(t.status, TaskStatus::Ready | TaskStatus::InProgress))
        .collect();
    sorted_by_identifier(filtered)
}

/// Tasks still waiting on an unresolved dependency.
pub fn get_blocked_tasks(graph: &TaskGraph) -> Vec<SubTask> {
    let filtered = graph
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Blocked)
        .collect();
    sorted_by_identifier(filtered)
}

/// The graph's distinguished verification gate, if it has one.
///
/// At most one task per graph is recognized as the gate; if more than one
/// title matches, the lexicographically-first identifier wins.
pub fn get_verification_task(graph: &TaskGraph) -> Option<SubTask> {
    let candidates: Vec<&SubTask> = graph
        .tasks
        .values()
        .filter(|t| is_verification_gate(&t.title))
        .collect();
    sorted_by_identifier(candidates).into_iter().next()
}

pub fn get_graph_stats(graph: &TaskGraph) -> GraphStats {
    let mut stats = GraphStats {
        total: graph.tasks.len(),
        done: 0,
        ready: 0,
        blocked: 0,
        in_progress: 0,
        failed: 0,
    };
    for task in graph.tasks.values() {
        match task.status {
            TaskStatus::Done => stats.done += 1,
            TaskStatus::Ready => stats.ready += 1,
            TaskStatus::Blocked => stats.blocked += 1,
            TaskStatus::InProgress => stats.in_progress += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Pending => {}
        }
    }
    stats
}

/// Pure status transition. Returns a new graph with `task_id` set to
/// `new_status`; a no-op (graph unchanged) if the task is already in that
/// status or doesn't exist. Transitioning a task to `Done` cascades: every
/// other pending/blocked task is re-derived in case this was its last
/// unresolved dependency.
pub fn update_task_status(graph: &TaskGraph, task_id: &str, new_status: TaskStatus) -> TaskGraph {
    let mut tasks = graph.tasks.clone();

    let changed = match tasks.get_mut(task_id) {
        Some(task) if task.status != new_status => {
            task.status = new_status;
            true
        }
        _ => false,
    };

    if changed && new_status == TaskStatus::Done {
        relax_derived_statuses(&mut tasks);
    }

    TaskGraph {
        parent_id: graph.parent_id.clone(),
        parent_identifier: graph.parent_identifier.clone(),
        tasks,
    }
}

/// Revert `task_id` to `Ready` after a verification gate reports NEEDS_WORK
/// against it, and re-block every task that depends on it. Without this, a
/// task that derived `Ready`/`Done` from `task_id`'s now-reverted completion
/// (most importantly the gate itself) would stay schedulable and could run
/// concurrently with `task_id`'s redo instead of waiting for it to finish
/// again.
pub fn revert_for_needs_work(graph: &TaskGraph, task_id: &str) -> TaskGraph {
    let mut tasks = graph.tasks.clone();

    if let Some(task) = tasks.get_mut(task_id) {
        task.status = TaskStatus::Ready;
    }

    let dependents = tasks.get(task_id).map(|t| t.blocks.clone()).unwrap_or_default();
    for dep_id in dependents {
        if let Some(dep) = tasks.get_mut(&dep_id) {
            if matches!(dep.status, TaskStatus::Ready | TaskStatus::Pending) {
                dep.status = TaskStatus::Blocked;
            }
        }
    }

    TaskGraph {
        parent_id: graph.parent_id.clone(),
        parent_identifier: graph.parent_identifier.clone(),
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(id: &str, identifier: &str, title: &str, status: &str, blocked_by: &[&str]) -> LinearIssue {
        LinearIssue {
            id: id.to_string(),
            identifier: identifier.to_string(),
            title: title.to_string(),
            status: status.to_string(),
            git_branch_name: String::new(),
            relations: Some(Relations {
                blocked_by: blocked_by
                    .iter()
                    .map(|id| Relation {
                        id: id.to_string(),
                        identifier: id.to_string(),
                    })
                    .collect(),
                blocks: Vec::new(),
            }),
        }
    }

    #[test]
    fn test_build_task_graph_derives_blocks_inverse() {
        let issues = vec![
            issue("1", "MOB-1", "First", "todo", &[]),
            issue("2", "MOB-2", "Second", "todo", &["1"]),
        ];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        assert_eq!(graph.tasks["1"].blocks, vec!["2".to_string()]);
        assert_eq!(graph.tasks["1"].status, TaskStatus::Ready);
        assert_eq!(graph.tasks["2"].status, TaskStatus::Blocked);
    }

    #[test]
    fn test_unknown_blocker_treated_as_resolved() {
        let issues = vec![issue("1", "MOB-1", "First", "todo", &["ghost"])];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        assert_eq!(graph.tasks["1"].status, TaskStatus::Ready);
    }

    #[test]
    fn test_update_task_status_cascades_done() {
        let issues = vec![
            issue("1", "MOB-1", "First", "todo", &[]),
            issue("2", "MOB-2", "Second", "todo", &["1"]),
        ];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        let graph = update_task_status(&graph, "1", TaskStatus::Done);
        assert_eq!(graph.tasks["1"].status, TaskStatus::Done);
        assert_eq!(graph.tasks["2"].status, TaskStatus::Ready);
    }

    #[test]
    fn test_update_task_status_is_noop_when_unchanged() {
        let issues = vec![issue("1", "MOB-1", "First", "todo", &[])];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        let same = update_task_status(&graph, "1", graph.tasks["1"].status);
        assert_eq!(same.tasks["1"].status, graph.tasks["1"].status);
    }

    #[test]
    fn test_get_verification_task_matches_case_insensitively() {
        let issues = vec![
            issue("1", "MOB-1", "Do the work", "todo", &[]),
            issue("2", "MOB-2", "VERIFICATION GATE", "todo", &[]),
        ];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        let gate = get_verification_task(&graph).expect("gate present");
        assert_eq!(gate.id, "2");
    }

    #[test]
    fn test_is_verification_gate_requires_contiguous_phrase() {
        assert!(is_verification_gate("[MOB-100] Verification Gate"));
        assert!(!is_verification_gate("Gate locked pending verification of scope"));
    }

    #[test]
    fn test_revert_for_needs_work_reblocks_the_gate() {
        let issues = vec![
            issue("1", "MOB-101", "Do the work", "done", &[]),
            issue("2", "MOB-103", "Verification Gate", "todo", &["1"]),
        ];
        let graph = build_task_graph("p1", "MOB-100", &issues);
        assert_eq!(graph.tasks["2"].status, TaskStatus::Ready);

        let reverted = revert_for_needs_work(&graph, "1");
        assert_eq!(reverted.tasks["1"].status, TaskStatus::Ready);
        assert_eq!(
            reverted.tasks["2"].status,
            TaskStatus::Blocked,
            "gate must not be schedulable while its sibling is redoing work"
        );
    }

    #[test]
    fn test_get_ready_tasks_sorted_by_identifier() {
        let issues = vec![
            issue("1", "MOB-10", "A", "todo", &[]),
            issue("2", "MOB-2", "B", "todo", &[]),
        ];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        let ready = get_ready_tasks(&graph);
        // String comparison, not numeric: "MOB-10" < "MOB-2" lexicographically.
        assert_eq!(ready[0].identifier, "MOB-10");
        assert_eq!(ready[1].identifier, "MOB-2");
    }

    #[test]
    fn test_get_graph_stats_counts_all_statuses() {
        let issues = vec![
            issue("1", "MOB-1", "A", "done", &[]),
            issue("2", "MOB-2", "B", "todo", &[]),
        ];
        let graph = build_task_graph("p1", "MOB-0", &issues);
        let stats = get_graph_stats(&graph);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.ready, 1);
    }
}
