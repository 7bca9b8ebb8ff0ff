pub mod config;
pub mod context;
pub mod enums;
pub mod task_graph;

// Re-export commonly used types for convenience
pub use config::{
    ExecutionConfig, LinearConfig, LoopConfig, ProjectDetectionResult, VerificationCommands,
    VerificationConfig,
};
pub use context::{
    ContextMetadata, IssueContext, ParentIssueContext, PendingUpdate, PendingUpdateData,
    PendingUpdatesQueue, RuntimeState, SessionInfo, SkillOutputData, SubTaskContext, SyncLog,
    SyncLogEntry,
};
pub use enums::{
    AgentRuntime, Backend, BuildSystem, Model, PendingUpdateType, ProjectType, SkillOutputStatus,
    TaskStatus,
};
pub use task_graph::{
    GraphStats, LinearIssue, ParentIssue, Relation, Relations, SubTask, TaskGraph, TaskScoring,
};
