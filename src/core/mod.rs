//! 核心层：错误分类、ID 生成、任务状态、编排器主循环

pub mod error;
pub mod ids;
pub mod orchestrator;
pub mod task;

pub use error::{
    AgentError, ExecutionError, FeedbackError, InferenceError, PlanningError, StoreError,
    ToolError,
};
pub use ids::new_id;
pub use orchestrator::Orchestrator;
pub use task::{FailureKind, Task, TaskResult, TaskStatus};
