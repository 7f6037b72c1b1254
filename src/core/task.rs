//! 任务状态
//!
//! Task 状态转移由 Orchestrator 独占：Pending → Planning → Executing → {Completed, Failed}，
//! 进入终态后不可变。TaskResult 是跨提交边界的对外结果：只含分类名与可读摘要，
//! 不暴露内部错误对象。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::new_id;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// 是否为终态（Completed / Failed）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 失败类别（对外摘要用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 规划失败，未执行任何子任务
    Planning,
    /// 执行失败（全部失败，或部分失败且重规划预算用尽）
    Execution,
    /// 用户取消
    Cancelled,
}

/// 任务：调用方提交的一个工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: new_id("task"),
            description: description.into(),
            created_at: Utc::now(),
            status: TaskStatus::Pending,
        }
    }
}

/// 任务最终结果（对外）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub succeeded_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    /// 失败类别；Completed 时为 None
    pub failure: Option<FailureKind>,
    /// 可读摘要，如 "planning failed: plan contains no steps"
    pub error_summary: Option<String>,
}

impl TaskResult {
    /// 成功结果
    pub fn completed(task_id: String, succeeded: Vec<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            succeeded_steps: succeeded,
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            failure: None,
            error_summary: None,
        }
    }

    /// 失败结果
    pub fn failed(
        task_id: String,
        failure: FailureKind,
        summary: String,
        succeeded: Vec<String>,
        failed: Vec<String>,
        skipped: Vec<String>,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            succeeded_steps: succeeded,
            failed_steps: failed,
            skipped_steps: skipped,
            failure: Some(failure),
            error_summary: Some(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
    }

    #[test]
    fn test_new_task_pending() {
        let t = Task::new("fetch weather");
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.id.starts_with("task_"));
    }
}
