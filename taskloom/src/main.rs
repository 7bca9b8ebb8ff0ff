pub mod config;
pub mod context;
pub mod executor;
pub mod git_lock;
pub mod jira;
pub mod linear;
pub mod local_state;
pub mod loop_command;
pub mod output_parser;
pub mod push_path;
pub mod tracker;
pub mod tracker_port;
pub mod types;
pub mod worktree;

use clap::Parser;

use loop_command::LoopOptions;

#[derive(Parser)]
#[command(
    name = "taskloom",
    version,
    about = "Dependency-graph orchestrator for AI agent sub-tasks",
    long_about = "Taskloom drives sub-tasks from an issue tracker through an external code-generation agent, fanning out ready work, verifying results against the tracker, and re-looping the verification gate on NEEDS_WORK."
)]
struct Cli {
    /// Parent task/issue identifier to execute
    task_id: String,

    /// Bypass container sandbox, run directly on host
    #[arg(long)]
    no_sandbox: bool,

    /// Backend: linear, jira, or local
    #[arg(short, long)]
    backend: Option<String>,

    /// Model: opus, sonnet, or haiku
    #[arg(short, long)]
    model: Option<String>,

    /// Max parallel agents (overrides config)
    #[arg(short, long)]
    parallel: Option<u32>,

    /// Maximum iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Clear stale state from previous executions before starting
    #[arg(short, long)]
    fresh: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let options = LoopOptions {
        task_id: cli.task_id,
        no_sandbox: cli.no_sandbox,
        backend: cli.backend,
        model: cli.model,
        parallel: cli.parallel,
        max_iterations: cli.max_iterations,
        fresh: cli.fresh,
    };

    if let Err(e) = loop_command::run_loop(options).await {
        eprintln!("Loop error: {e:#}");
        std::process::exit(1);
    }
}
