//! Orchestrator loop: per-iteration scheduling of agent invocations against
//! a dependency graph, with verification-gate re-looping.
//!
//! One run drives a single parent identifier from graph-build to a terminal
//! exit condition (`SuccessAllDone`, `SuccessVerificationGate`,
//! `NoProgressBlocked`, `PermanentFailure`, or `MaxIterationsReached`).

use std::fs;
use std::path::Path;
use std::process;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use chrono::Utc;
use colored::Colorize;

use crate::config;
use crate::context::{self, PendingUpdateInput};
use crate::executor;
use crate::local_state::{self, CompletionSummary, IterationLogEntry, IterationStatus, TaskOutcome};
use crate::output_parser::parse_skill_output;
use crate::push_path;
use crate::tracker;
use crate::tracker_port::{LinearTrackerPort, LocalTrackerPort, TrackerPort};
use crate::types::context::{RuntimeActiveTask, SkillOutputData};
use crate::types::enums::{AgentRuntime, Backend, Model, TaskStatus};
use crate::types::task_graph::{
    build_task_graph, get_blocked_tasks, get_graph_stats, get_ready_tasks, get_verification_task,
    revert_for_needs_work, update_task_status, SubTask, TaskGraph,
};
use crate::worktree::{self, WorktreeConfig};

/// Options passed from the CLI entry point to the loop orchestrator.
pub struct LoopOptions {
    pub task_id: String,
    pub no_sandbox: bool,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub parallel: Option<u32>,
    pub max_iterations: Option<u32>,
    pub fresh: bool,
}

/// Terminal exit conditions of the orchestrator loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    SuccessAllDone,
    SuccessVerificationGate,
    NoProgressBlocked,
    PermanentFailure,
    MaxIterationsReached,
}

impl LoopExit {
    fn is_success(self) -> bool {
        matches!(self, LoopExit::SuccessAllDone | LoopExit::SuccessVerificationGate)
    }
}

/// Main loop orchestrator entry point.
pub async fn run_loop(options: LoopOptions) -> Result<()> {
    // -----------------------------------------------------------------------
    // Resolve configuration
    // -----------------------------------------------------------------------
    let paths = config::resolve_paths();
    let loop_config = match config::read_config_with_env(&paths.config_path) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("{}", "Warning: Could not read config, using defaults.".yellow());
            crate::types::config::LoopConfig::default()
        }
    };

    let backend = if let Some(ref b) = options.backend {
        Backend::from_str(b).map_err(|e| anyhow::anyhow!(e))?
    } else {
        context::detect_backend(None)
    };

    let mut exec_config = loop_config.execution.clone();
    if let Some(p) = options.parallel {
        exec_config.max_parallel_agents = Some(p);
    }
    if let Some(ref m) = options.model {
        if loop_config.runtime == AgentRuntime::Opencode {
            exec_config.model = m.trim().to_string();
        } else {
            exec_config.model = Model::from_str(m).map_err(|e| anyhow::anyhow!(e))?.to_string();
        }
    }
    let max_iterations = options.max_iterations.unwrap_or(exec_config.max_iterations);

    // -----------------------------------------------------------------------
    // Signal handling: flush runtime state and leave locks/worktrees in place
    // -----------------------------------------------------------------------
    let task_id = options.task_id.clone();
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let cleanup_task_id = task_id.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown_flag.store(true, Ordering::SeqCst);
        context::clear_all_runtime_active_tasks(&cleanup_task_id);
        eprintln!("\nReceived interrupt, cleaning up...");
        process::exit(130);
    });

    if options.fresh {
        if context::delete_runtime_state(&task_id) {
            println!("{}", "Cleared stale state from previous execution.".yellow());
        }
    }

    println!("{}", format!("Starting loop for {task_id}...").blue());

    // -----------------------------------------------------------------------
    // Fetch parent issue from local state
    // -----------------------------------------------------------------------
    let parent_spec = local_state::read_parent_spec(&task_id).ok_or_else(|| {
        anyhow::anyhow!(
            "Could not fetch issue {task_id}. Ensure local task files exist in .mobius/issues/<task_id>/"
        )
    })?;
    let branch_name = if parent_spec.git_branch_name.is_empty() {
        format!("feat/{}", task_id.to_lowercase())
    } else {
        parent_spec.git_branch_name.clone()
    };
    let parent_id = parent_spec.id.clone();
    let parent_identifier = parent_spec.identifier.clone();
    let parent_title = parent_spec.title.clone();

    println!("{}", format!("Issue: {parent_title}").dimmed());
    println!("{}", format!("Branch: {branch_name}").dimmed());

    // -----------------------------------------------------------------------
    // Create or resume the shared working copy
    // -----------------------------------------------------------------------
    let wt_config = WorktreeConfig {
        worktree_path: exec_config.worktree_path.clone(),
        base_branch: exec_config.base_branch.clone(),
        runtime: loop_config.runtime,
    };
    let worktree_info = worktree::create_worktree(&task_id, &branch_name, &wt_config).await?;
    println!(
        "{}",
        if worktree_info.created {
            format!("Created worktree at {}", worktree_info.path.display()).green()
        } else {
            format!("Resuming existing worktree at {}", worktree_info.path.display()).yellow()
        }
    );
    let worktree_path = worktree_info.path.to_string_lossy().to_string();

    // -----------------------------------------------------------------------
    // Build the initial task graph
    // -----------------------------------------------------------------------
    let issues = local_state::read_local_subtasks_as_linear_issues(&task_id);
    let mut graph = build_task_graph(&parent_id, &parent_identifier, &issues);

    // -----------------------------------------------------------------------
    // Generate and mirror context for the agent's skills
    // -----------------------------------------------------------------------
    if !issues.is_empty() {
        println!("{}", "Generating local context for skills...".dimmed());
        if let Some(ctx) = context::generate_context(&task_id, Some(&worktree_path), false)? {
            let path = context::write_full_context_file(&task_id, &ctx)?;
            println!("{}", format!("Context file: {path}").dimmed());
        } else {
            eprintln!("{}", "Warning: Failed to generate issue context".yellow());
        }

        let worktree_context_file = mirror_issue_context_to_worktree(&task_id, &worktree_info.path)
            .with_context(|| {
                format!(
                    "Failed to stage .mobius issue context in worktree {}",
                    worktree_info.path.display()
                )
            })?;
        println!("{}", format!("Worktree context file: {worktree_context_file}").dimmed());
    }

    // -----------------------------------------------------------------------
    // Create execution session + initialize runtime state
    // -----------------------------------------------------------------------
    context::create_session(&task_id, backend, Some(&worktree_path))?;

    let total_tasks = graph.tasks.len() as u32;
    let mut runtime_state =
        context::initialize_runtime_state(&task_id, &parent_title, Some(process::id()), Some(total_tasks))?;
    for task in graph.tasks.values() {
        if task.status == TaskStatus::Done {
            runtime_state = context::complete_runtime_task(&runtime_state, &task.identifier);
        }
    }
    context::write_runtime_state(&runtime_state)?;

    let mut tracker_obj = tracker::create_tracker(
        exec_config.max_retries,
        exec_config.verification_timeout.map(|v| v as u64),
    );

    let tracker_port: Box<dyn TrackerPort> = build_tracker_port(backend, &loop_config, &parent_id)?;

    // -----------------------------------------------------------------------
    // Boundary case: empty sub-task list exits gracefully with zero
    // iterations (never a hard error).
    // -----------------------------------------------------------------------
    if graph.tasks.is_empty() {
        println!("{}", "No sub-tasks found; nothing to execute.".yellow());
        print_summary(&task_id, 0, &graph, LoopExit::SuccessAllDone);
        write_completion_summary(&parent_id, &graph, &tracker_obj, 0);
        return Ok(());
    }

    let (exit, total_iterations) = run_iterations(
        RunIterationsArgs {
            task_id: &task_id,
            parent_id: &parent_id,
            parent_identifier: &parent_identifier,
            worktree_path: &worktree_path,
            worktree_dir: &worktree_info.path,
            graph: &mut graph,
            runtime_state: &mut runtime_state,
            tracker: &mut tracker_obj,
            tracker_port: tracker_port.as_ref(),
            backend,
            agent_runtime: loop_config.runtime,
            exec_config: &exec_config,
            max_iterations,
            shutdown: &shutdown,
        },
    )
    .await?;

    print_summary(&task_id, total_tasks, &graph, exit);
    write_completion_summary(&parent_id, &graph, &tracker_obj, total_iterations);

    if !exit.is_success() {
        process::exit(1);
    }
    Ok(())
}

/// Persist a `CompletionSummary` to `.mobius/issues/<parentId>/summary.json` for
/// post-mortem inspection; best-effort, never blocks the exit path.
fn write_completion_summary(
    parent_id: &str,
    graph: &TaskGraph,
    tracker: &tracker::ExecutionTracker,
    total_iterations: u32,
) {
    let stats = get_graph_stats(graph);
    let task_outcomes = graph
        .tasks
        .values()
        .map(|t| TaskOutcome {
            id: t.identifier.clone(),
            status: t.status.to_string(),
            iterations: tracker.assignments.get(&t.id).map(|a| a.attempts).unwrap_or(0),
        })
        .collect();

    let _ = local_state::write_summary(
        parent_id,
        &CompletionSummary {
            parent_id: parent_id.to_string(),
            completed_at: Utc::now().to_rfc3339(),
            total_tasks: stats.total as u32,
            completed_tasks: stats.done as u32,
            failed_tasks: stats.failed as u32,
            total_iterations,
            task_outcomes,
        },
    );
}

fn build_tracker_port(
    backend: Backend,
    loop_config: &crate::types::config::LoopConfig,
    parent_id: &str,
) -> Result<Box<dyn TrackerPort>> {
    match backend {
        Backend::Linear => {
            let client = crate::linear::LinearClient::new()?;
            let team_id = loop_config
                .linear
                .as_ref()
                .and_then(|l| l.team.clone())
                .unwrap_or_default();
            Ok(Box::new(LinearTrackerPort::new(client, team_id)))
        }
        Backend::Jira => {
            let client = crate::jira::JiraClient::new()?;
            let project_key = loop_config
                .jira
                .as_ref()
                .and_then(|j| j.project_key.clone())
                .unwrap_or_default();
            Ok(Box::new(crate::tracker_port::JiraTrackerPort::new(client, project_key)))
        }
        Backend::Local => Ok(Box::new(LocalTrackerPort::new(parent_id.to_string()))),
    }
}

struct RunIterationsArgs<'a> {
    task_id: &'a str,
    parent_id: &'a str,
    parent_identifier: &'a str,
    worktree_path: &'a str,
    worktree_dir: &'a Path,
    graph: &'a mut TaskGraph,
    runtime_state: &'a mut crate::types::context::RuntimeState,
    tracker: &'a mut tracker::ExecutionTracker,
    tracker_port: &'a dyn TrackerPort,
    backend: Backend,
    agent_runtime: AgentRuntime,
    exec_config: &'a crate::types::config::ExecutionConfig,
    max_iterations: u32,
    shutdown: &'a Arc<AtomicBool>,
}

/// Runs the iteration loop described in the orchestrator design: pick ready
/// work, invoke agents, verify, reconcile, repeat.
async fn run_iterations(mut args: RunIterationsArgs<'_>) -> Result<(LoopExit, u32)> {
    let mut iteration: u32 = 0;
    let mut retry_queue: Vec<SubTask> = Vec::new();

    loop {
        if args.shutdown.load(Ordering::SeqCst) {
            return Ok((LoopExit::NoProgressBlocked, iteration));
        }
        if iteration >= args.max_iterations {
            return Ok((LoopExit::MaxIterationsReached, iteration));
        }
        iteration += 1;

        // Step 1: verification gate precedence.
        if let Some(vt) = get_verification_task(args.graph) {
            if vt.status == TaskStatus::Done {
                println!("{}", "\nVerification task completed successfully!".green());
                return Ok((LoopExit::SuccessVerificationGate, iteration));
            }
        }

        // Step 2: all done.
        let stats = get_graph_stats(args.graph);
        if stats.done == stats.total {
            println!("{}", "\nAll tasks completed!".green());
            return Ok((LoopExit::SuccessAllDone, iteration));
        }

        // Step 3: schedulable = ready ∪ retryQueue, deduplicated by id.
        // retryQueue entries are re-checked against the graph's current
        // status rather than trusted as-is: a queued task may have been
        // re-blocked since it was queued (e.g. a verification gate whose
        // sibling just got reverted to Ready for a NEEDS_WORK redo).
        let mut schedulable: Vec<SubTask> = get_ready_tasks(args.graph);
        for retry_task in retry_queue.drain(..) {
            let still_schedulable = matches!(
                args.graph.tasks.get(&retry_task.id).map(|t| t.status),
                Some(TaskStatus::Ready) | Some(TaskStatus::InProgress)
            );
            if still_schedulable && !schedulable.iter().any(|t| t.id == retry_task.id) {
                schedulable.push(retry_task);
            }
        }

        // Step 4: nothing schedulable.
        if schedulable.is_empty() {
            let blocked = get_blocked_tasks(args.graph);
            if !blocked.is_empty() {
                let ids: Vec<&str> = blocked.iter().map(|t| t.identifier.as_str()).collect();
                println!("{}", "\nNo tasks ready. All remaining tasks are blocked.".yellow());
                println!("{}", format!("Blocked: {}", ids.join(", ")).dimmed());
            }
            return Ok((LoopExit::NoProgressBlocked, iteration));
        }

        // Step 5: parallelism, identifier-ascending order (schedulable is
        // already sorted by `get_ready_tasks`/insertion order from retry).
        schedulable.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let parallelism = executor::calculate_parallelism(schedulable.len(), args.exec_config);
        let batch: Vec<SubTask> = schedulable.into_iter().take(parallelism).collect();

        println!(
            "{}",
            format!("\nIteration {iteration}: executing {} task(s)...", batch.len()).blue()
        );
        let ids: Vec<&str> = batch.iter().map(|t| t.identifier.as_str()).collect();
        println!("{}", format!("  Tasks: {}", ids.join(", ")).dimmed());

        // Step 6: assign + addActive.
        let now = Utc::now().to_rfc3339();
        for task in &batch {
            tracker::assign_task(args.tracker, task);
            *args.runtime_state = context::add_runtime_active_task(
                args.runtime_state,
                RuntimeActiveTask {
                    id: task.identifier.clone(),
                    pid: 0,
                    pane: String::new(),
                    started_at: now.clone(),
                    worktree: Some(args.worktree_path.to_string()),
                },
            );
        }
        context::write_runtime_state(args.runtime_state)?;

        // Step 7: invoke agents in parallel and await the whole batch.
        // Every sub-task shares the single per-parent worktree; the Worktree
        // Mutex (git_lock) guards the VCS-mutating portion of each agent's
        // own commit path, not this fan-out itself.
        let worktree_paths: Vec<String> = batch.iter().map(|_| args.worktree_path.to_string()).collect();
        let context_file_path = worktree_context_file_path(args.task_id, args.worktree_dir);
        let results = executor::execute_parallel(
            &batch,
            &worktree_paths,
            args.agent_runtime,
            args.exec_config,
            context_file_path.as_deref(),
        )
        .await;

        // Step 8: NEEDS_WORK re-loop.
        for result in &results {
            if let Some(raw) = &result.raw_output {
                if let Ok(SkillOutputData::NeedsWork { failing_subtasks, .. }) = parse_skill_output(raw) {
                    for target in failing_subtasks.into_iter().flatten() {
                        context::queue_pending_update(
                            args.parent_identifier,
                            &PendingUpdateInput::AddComment {
                                issue_id: target.id.clone(),
                                identifier: target.identifier.clone(),
                                body: format!(
                                    "Verification gate found issues, re-running: {}",
                                    target
                                        .issues
                                        .iter()
                                        .map(|i| i.description.clone())
                                        .collect::<Vec<_>>()
                                        .join("; ")
                                ),
                            },
                        )?;
                        *args.graph = revert_for_needs_work(args.graph, &target.id);
                        if let Some(t) = args.graph.tasks.get(&target.id) {
                            if !retry_queue.iter().any(|r| r.id == t.id) {
                                retry_queue.push(t.clone());
                            }
                        }
                    }
                }
            }
        }

        // Step 9: tracker-verified results drive graph/state/queue reconciliation.
        let verified = tracker::process_results(args.tracker, &results, Some(&args.backend), args.tracker_port).await;
        let mut any_failed = false;

        for v in &verified {
            if v.success && v.backend_verified {
                *args.graph = update_task_status(args.graph, &v.task_id, TaskStatus::Done);
                *args.runtime_state = context::complete_runtime_task(args.runtime_state, &v.identifier);
                context::queue_pending_update(
                    args.parent_identifier,
                    &PendingUpdateInput::StatusChange {
                        issue_id: v.task_id.clone(),
                        identifier: v.identifier.clone(),
                        old_status: "In Progress".to_string(),
                        new_status: "Done".to_string(),
                    },
                )?;
            } else if v.should_retry {
                *args.runtime_state = context::remove_runtime_active_task(args.runtime_state, &v.identifier);
                if let Some(t) = args.graph.tasks.get(&v.task_id) {
                    if !retry_queue.iter().any(|r| r.id == t.id) {
                        retry_queue.push(t.clone());
                    }
                }
            } else {
                *args.graph = update_task_status(args.graph, &v.task_id, TaskStatus::Failed);
                *args.runtime_state = context::fail_runtime_task(args.runtime_state, &v.identifier);
                any_failed = true;
            }
        }
        context::write_runtime_state(args.runtime_state)?;

        for v in &verified {
            let assignment_attempts = args.tracker.assignments.get(&v.task_id).map(|a| a.attempts).unwrap_or(1);
            let status = if v.success && v.backend_verified {
                IterationStatus::Success
            } else if v.should_retry {
                IterationStatus::Partial
            } else {
                IterationStatus::Failed
            };
            let _ = local_state::write_iteration_log(
                args.parent_id,
                IterationLogEntry {
                    subtask_id: v.identifier.clone(),
                    attempt: assignment_attempts,
                    started_at: now.clone(),
                    completed_at: Some(Utc::now().to_rfc3339()),
                    status,
                    error: v.error.clone(),
                    files_modified: None,
                    commit_hash: None,
                },
            );
        }

        // Step 10: exit on permanent failure.
        if tracker::has_permanent_failures(&verified) || any_failed {
            return Ok((LoopExit::PermanentFailure, iteration));
        }

        // Push whatever side-effects accumulated this iteration so the
        // dashboard and tracker stay close to real time.
        push_path::push_pending_updates(args.parent_identifier, args.tracker_port).await;
    }
}

fn worktree_context_file_path(task_id: &str, worktree_dir: &Path) -> Option<String> {
    let path = worktree_dir.join(".mobius").join("issues").join(task_id).join("context.json");
    if path.exists() {
        Some(path.to_string_lossy().to_string())
    } else {
        None
    }
}

fn print_summary(task_id: &str, total_tasks: u32, graph: &TaskGraph, exit: LoopExit) {
    let stats = get_graph_stats(graph);
    println!();
    println!("{}", format!("=== Summary for {task_id} ===").bold());
    println!("  Total:     {}", total_tasks.max(stats.total as u32));
    println!("  Completed: {}", stats.done);
    println!("  Failed:    {}", stats.failed);
    println!("  Exit:      {exit:?}");
}

/// Mirror the locally-generated issue context into the worktree's own
/// `.mobius/` directory so the agent's skills can read it without
/// reaching back out to the parent repo checkout.
fn mirror_issue_context_to_worktree(task_id: &str, worktree_path: &Path) -> Result<String> {
    let source_issue_path = context::get_context_path(task_id);
    if !source_issue_path.exists() {
        anyhow::bail!("Issue context not found at {}", source_issue_path.display());
    }

    let target_base_path = worktree_path.join(".mobius");
    let target_issue_path = target_base_path.join("issues").join(task_id);

    if source_issue_path != target_issue_path {
        copy_dir_recursive(&source_issue_path, &target_issue_path)?;
    }

    let gitignore_path = target_base_path.join(".gitignore");
    if !gitignore_path.exists() {
        fs::create_dir_all(&target_base_path)?;
        fs::write(&gitignore_path, "state/\n")?;
    }

    let context_file = target_issue_path.join("context.json");
    if !context_file.exists() {
        anyhow::bail!("Mirrored context file not found at {}", context_file.display());
    }

    Ok(context_file.to_string_lossy().to_string())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        anyhow::bail!("Source directory does not exist: {}", src.display());
    }
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_exit_is_success() {
        assert!(LoopExit::SuccessAllDone.is_success());
        assert!(LoopExit::SuccessVerificationGate.is_success());
        assert!(!LoopExit::NoProgressBlocked.is_success());
        assert!(!LoopExit::PermanentFailure.is_success());
        assert!(!LoopExit::MaxIterationsReached.is_success());
    }

    #[test]
    fn test_worktree_context_file_path_missing_is_none() {
        let dir = std::env::temp_dir().join("taskloom-test-missing-context");
        assert!(worktree_context_file_path("NOPE-1", &dir).is_none());
    }
}
