//! Agent Invoker: spawns the code-generation agent as a child process for
//! one sub-task inside one worktree, captures its stdout, and decodes the
//! result through the output parser.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{sleep, Duration};

use crate::output_parser::parse_skill_output;
use crate::types::context::SkillOutputData;
use crate::types::enums::Model;
use crate::types::task_graph::is_verification_gate;
use crate::types::AgentRuntime;
use crate::types::{ExecutionConfig, SubTask};

/// Verification skill identifier
const VERIFICATION_SKILL: &str = "/verify";

/// Default execute skill identifier
const EXECUTE_SKILL: &str = "/execute";

/// Default timeout per agent (30 minutes), used when `ExecutionConfig`
/// doesn't specify one.
const DEFAULT_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Result of executing a single agent task.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub identifier: String,
    pub success: bool,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub raw_output: Option<String>,
}

/// Status of an execution result, per the Agent Invoker contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    SubtaskComplete,
    VerificationFailed,
    Error,
}

/// Aggregated results from a batch of executions.
#[derive(Debug, Clone)]
pub struct AggregatedResults {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub completed: Vec<String>,
    pub failed_tasks: Vec<String>,
}

/// The subprocess invocation for one agent: program, argv, and extra
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Select the appropriate skill for a task.
///
/// Verification Gate tasks use `/verify`, all others use `/execute`.
pub fn select_skill_for_task(task: &SubTask) -> &str {
    if is_verification_gate(&task.title) {
        VERIFICATION_SKILL
    } else {
        EXECUTE_SKILL
    }
}

/// Select the model for a task based on its scoring data.
///
/// If the task has scoring with a recommended model, use that.
/// Otherwise fall back to the global config model.
pub fn select_model_for_task(task: &SubTask, config_model: Model) -> Model {
    task.scoring
        .as_ref()
        .map(|s| s.recommended_model)
        .unwrap_or(config_model)
}

/// Calculate the actual parallelism level given ready tasks and config.
pub fn calculate_parallelism(ready_task_count: usize, config: &ExecutionConfig) -> usize {
    let max_parallel = config.max_parallel_agents.unwrap_or(3) as usize;
    max_parallel.min(ready_task_count)
}

/// The timeout to bound one agent invocation, from config or the default.
pub fn agent_timeout_ms(config: &ExecutionConfig) -> u64 {
    config.agent_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
}

/// Build the child-process invocation for one task.
///
/// The worktree path and task identifier are the only task-identifying
/// parameters passed to the agent; everything else is config-derived.
pub fn build_agent_command(
    runtime: AgentRuntime,
    task: &SubTask,
    config: &ExecutionConfig,
    context_file_path: Option<&str>,
    model: Model,
) -> AgentCommand {
    let skill = select_skill_for_task(task);
    let mut env = Vec::new();
    if let Some(path) = context_file_path {
        env.push(("TASKLOOM_CONTEXT_FILE".to_string(), path.to_string()));
        env.push(("TASKLOOM_TASK_ID".to_string(), task.identifier.clone()));
    }

    match runtime {
        AgentRuntime::Claude => {
            let mut args = vec![
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
                "--verbose".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--model".to_string(),
                model.to_string(),
            ];
            if let Some(tools) = config
                .disallowed_tools
                .as_ref()
                .filter(|tools| !tools.is_empty())
            {
                args.push("--disallowedTools".to_string());
                args.push(tools.join(","));
            }
            args.push(format!("{skill} {}", task.identifier));

            AgentCommand {
                program: "claude".to_string(),
                args,
                env,
            }
        }
        AgentRuntime::Opencode => {
            let args = vec![
                "run".to_string(),
                "--model".to_string(),
                format!("openai/{}", config.model),
                format!(
                    "Use the {} skill for sub-task {}",
                    skill.trim_start_matches('/'),
                    task.identifier
                ),
            ];

            AgentCommand {
                program: "opencode".to_string(),
                args,
                env,
            }
        }
    }
}

/// Map a parsed skill output onto the Agent Invoker's three-way status.
///
/// Per the invocation contract: `SUBTASK_COMPLETE`/`PASS`/`ALL_COMPLETE` are
/// success; `VERIFICATION_FAILED`/`FAIL` are verification failures;
/// everything else (including `NEEDS_WORK`, which the orchestrator inspects
/// via the preserved raw output rather than this status) is `Error`.
fn classify_skill_output(data: &SkillOutputData) -> (bool, ExecutionStatus, Option<String>) {
    match data {
        SkillOutputData::SubtaskComplete { .. } | SkillOutputData::AllComplete { .. } => {
            (true, ExecutionStatus::SubtaskComplete, None)
        }
        SkillOutputData::Pass { .. } => (true, ExecutionStatus::SubtaskComplete, None),
        SkillOutputData::VerificationFailed { error_output, .. } => (
            false,
            ExecutionStatus::VerificationFailed,
            Some(error_output.clone()),
        ),
        SkillOutputData::Fail { reason, .. } => {
            (false, ExecutionStatus::VerificationFailed, Some(reason.clone()))
        }
        SkillOutputData::AllBlocked { .. } | SkillOutputData::NoSubtasks { .. } => (
            false,
            ExecutionStatus::Error,
            Some("No actionable sub-tasks available".to_string()),
        ),
        SkillOutputData::NeedsWork { .. } => (false, ExecutionStatus::Error, None),
        SkillOutputData::SubtaskPartial { .. } => (
            false,
            ExecutionStatus::Error,
            Some("Sub-task left incomplete".to_string()),
        ),
    }
}

/// Spawn the agent for one task and await its result, bounded by `timeout_ms`.
///
/// The child's working directory is `worktree_path`. Exit code is not
/// authoritative — only the parsed stdout `status` is; a non-decodable
/// document becomes `ERROR` regardless of exit code.
pub async fn execute_agent(
    task: &SubTask,
    worktree_path: &str,
    command: AgentCommand,
    timeout_ms: u64,
) -> ExecutionResult {
    let start = Instant::now();

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(worktree_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return error_result(
                task,
                start.elapsed().as_millis() as u64,
                format!("Failed to spawn agent process: {e}"),
                None,
            );
        }
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let read_output = async {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).to_string()
    };

    tokio::select! {
        raw_output = read_output => {
            let _ = child.wait().await;
            finalize_result(task, start.elapsed().as_millis() as u64, raw_output)
        }
        _ = sleep(Duration::from_millis(timeout_ms)) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            error_result(
                task,
                start.elapsed().as_millis() as u64,
                format!("Agent timed out after {} seconds", timeout_ms / 1000),
                None,
            )
        }
    }
}

fn finalize_result(task: &SubTask, duration_ms: u64, raw_output: String) -> ExecutionResult {
    match parse_skill_output(&raw_output) {
        Ok(data) => {
            let (success, status, error) = classify_skill_output(&data);
            ExecutionResult {
                task_id: task.id.clone(),
                identifier: task.identifier.clone(),
                success,
                status,
                duration_ms,
                error,
                raw_output: Some(raw_output),
            }
        }
        Err(e) => error_result(task, duration_ms, e.to_string(), Some(raw_output)),
    }
}

fn error_result(
    task: &SubTask,
    duration_ms: u64,
    error: String,
    raw_output: Option<String>,
) -> ExecutionResult {
    ExecutionResult {
        task_id: task.id.clone(),
        identifier: task.identifier.clone(),
        success: false,
        status: ExecutionStatus::Error,
        duration_ms,
        error: Some(error),
        raw_output,
    }
}

/// Execute a batch of tasks in parallel, one child process per task.
///
/// The caller is expected to have already taken the Worktree Mutex around
/// any shared version-control mutation inside each `worktree_path`; paths
/// that are genuinely per-task don't need it.
pub async fn execute_parallel(
    tasks: &[SubTask],
    worktree_paths: &[String],
    runtime: AgentRuntime,
    config: &ExecutionConfig,
    context_file_path: Option<&str>,
) -> Vec<ExecutionResult> {
    let timeout_ms = agent_timeout_ms(config);
    let default_model = config.model.parse::<Model>().unwrap_or_default();

    let futures = tasks.iter().zip(worktree_paths.iter()).map(|(task, worktree_path)| {
        let model = select_model_for_task(task, default_model);
        let command = build_agent_command(runtime, task, config, context_file_path, model);
        execute_agent(task, worktree_path, command, timeout_ms)
    });

    futures::future::join_all(futures).await
}

/// Aggregate execution results into summary statistics.
pub fn aggregate_results(results: &[ExecutionResult]) -> AggregatedResults {
    let succeeded: Vec<&ExecutionResult> = results.iter().filter(|r| r.success).collect();
    let failed: Vec<&ExecutionResult> = results.iter().filter(|r| !r.success).collect();

    AggregatedResults {
        total: results.len(),
        succeeded: succeeded.len(),
        failed: failed.len(),
        completed: succeeded.iter().map(|r| r.identifier.clone()).collect(),
        failed_tasks: failed
            .iter()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.identifier,
                    r.error.as_deref().unwrap_or(&format!("{:?}", r.status))
                )
            })
            .collect(),
    }
}
