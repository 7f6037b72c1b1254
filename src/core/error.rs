//! 错误分类
//!
//! 按来源划分：推理边界（InferenceError）、工具（ToolError）、规划（PlanningError）、
//! 执行（ExecutionError）、存储（StoreError）、反馈（FeedbackError）。
//! 传播策略：Transient 在 Executor 内重试后吸收；Permanent 使子任务失败并跳过依赖者；
//! PlanningError 直接终止任务；所有错误在传播前写入决策轨迹。

use thiserror::Error;

/// 推理能力边界错误（外部 LLM 后端）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Inference timeout")]
    Timeout,

    #[error("Inference rate limited")]
    RateLimited,

    #[error("Inference unavailable: {0}")]
    Unavailable(String),
}

/// 工具调用错误：Transient 可重试，Permanent / InvalidInput 立即失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Transient tool error: {0}")]
    Transient(String),

    #[error("Permanent tool error: {0}")]
    Permanent(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),
}

impl ToolError {
    /// 是否可重试（仅 Transient）
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient(_))
    }
}

/// 规划错误：任一变体都会使任务直接失败（不会执行半成品计划）
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Task description is empty")]
    EmptyDescription,

    #[error("Invalid plan graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown tool in plan: {0}")]
    UnknownTool(String),

    #[error("Plan contains no steps")]
    EmptyPlan,

    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("Trace write failed: {0}")]
    Store(#[from] StoreError),
}

impl PlanningError {
    /// 分类名（写入 TaskResult.error_summary，内部错误对象不跨边界暴露）
    pub fn kind(&self) -> &'static str {
        match self {
            PlanningError::EmptyDescription => "empty_description",
            PlanningError::InvalidGraph(_) => "invalid_graph",
            PlanningError::UnknownTool(_) => "unknown_tool",
            PlanningError::EmptyPlan => "empty_plan",
            PlanningError::Inference(_) => "inference_unavailable",
            PlanningError::Store(_) => "store_error",
        }
    }
}

/// 执行错误：整计划层面的失败（部分失败不是错误，见 ExecutionResult）
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// 没有任何子任务成功
    #[error("No subtask succeeded ({} failed)", .failed.len())]
    AllStepsFailed {
        failed: Vec<String>,
        skipped: Vec<String>,
    },

    /// 任务在子任务边界被取消；在途调用已完成或超时
    #[error("Task cancelled")]
    Cancelled {
        succeeded: Vec<String>,
        failed: Vec<String>,
        skipped: Vec<String>,
    },

    /// 防御性校验：计划图在执行前再次检查失败（正常不会发生）
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Trace write failed: {0}")]
    Store(#[from] StoreError),
}

/// 存储层错误（SQLite / IO）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// 反馈错误：评分越界
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Invalid feedback rating {rating} (allowed {min}..={max})")]
    InvalidFeedback { rating: i64, min: i64, max: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Agent 门面错误：聚合各层错误，供库调用方统一处理
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error("Config error: {0}")]
    Config(String),
}
