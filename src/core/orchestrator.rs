//! 编排器：任务状态机主循环
//!
//! Pending → Planning → Executing → {Completed, Failed}，部分失败且重规划预算未用尽时
//! 走 Executing → Planning 自环（预算有界，杜绝无限规划循环）。
//! 终态一经到达不再变更；成功子任务声明的 memory_key 输出在终态统一写入记忆。
//! 规划失败在传播前写 plan_failed 轨迹，保证审计轨迹反映真实原因。

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::error::{AgentError, ExecutionError, PlanningError, StoreError};
use crate::core::task::{FailureKind, Task, TaskResult, TaskStatus};
use crate::exec::{ExecutionResult, ExecutionStatus, Executor};
use crate::plan::{Plan, PlanContext, Planner};
use crate::store::{DecisionTrace, MemoryStore, PreferenceWrite, SetBy, TraceKind};
use crate::tools::ToolRegistry;

/// 编排器：驱动 Planner / Executor，独占任务状态转移
pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    tools: Arc<ToolRegistry>,
    memory: Arc<MemoryStore>,
    trace: Arc<DecisionTrace>,
    namespace: String,
    max_replans: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Planner,
        executor: Executor,
        tools: Arc<ToolRegistry>,
        memory: Arc<MemoryStore>,
        trace: Arc<DecisionTrace>,
        namespace: impl Into<String>,
        max_replans: u32,
    ) -> Self {
        Self {
            planner,
            executor,
            tools,
            memory,
            trace,
            namespace: namespace.into(),
            max_replans,
        }
    }

    /// 运行一个任务直到终态
    pub async fn run_task(
        &self,
        description: &str,
        cancel: CancellationToken,
    ) -> Result<TaskResult, AgentError> {
        let mut task = Task::new(description);
        tracing::info!(task_id = %task.id, "task submitted");

        // Pending → Planning
        task.status = TaskStatus::Planning;
        let ctx = self.snapshot_context()?;
        let mut plan = match self.planner.plan(&task, &ctx, &self.tools).await {
            Ok(p) => p,
            Err(e) => return self.fail_planning(task, e),
        };

        let mut replans = 0u32;
        // 各执行轮次中成功子任务声明的记忆写入，终态统一落盘
        let mut pending_memory: HashMap<String, String> = HashMap::new();

        loop {
            // Planning → Executing
            task.status = TaskStatus::Executing;
            tracing::info!(
                task_id = %task.id,
                plan_id = %plan.id,
                steps = plan.steps.len(),
                "executing plan"
            );

            match self.executor.execute(&plan, &cancel).await {
                Ok(result) => {
                    collect_memory_writes(&plan, &result, &mut pending_memory);
                    match result.status {
                        ExecutionStatus::Completed => {
                            self.finalize_memory(&task.id, &pending_memory)?;
                            task.status = TaskStatus::Completed;
                            tracing::info!(task_id = %task.id, "task completed");
                            return Ok(TaskResult::completed(task.id, result.succeeded));
                        }
                        ExecutionStatus::PartialFailure if replans < self.max_replans => {
                            // Executing → Planning（自环）
                            replans += 1;
                            task.status = TaskStatus::Planning;
                            let summary = failure_summary(&result);
                            tracing::warn!(
                                task_id = %task.id,
                                replan = replans,
                                "partial failure, replanning"
                            );
                            let ctx = self.snapshot_context()?;
                            match self
                                .planner
                                .replan(&task, &ctx, &self.tools, &plan, &summary)
                                .await
                            {
                                Ok(next) => {
                                    plan = next;
                                }
                                Err(e) => {
                                    self.finalize_memory(&task.id, &pending_memory)?;
                                    return self.fail_planning(task, e);
                                }
                            }
                        }
                        ExecutionStatus::PartialFailure => {
                            // 预算用尽：Executing → Failed
                            self.finalize_memory(&task.id, &pending_memory)?;
                            task.status = TaskStatus::Failed;
                            let summary = format!(
                                "partial failure with replan budget exhausted: {}",
                                failure_summary(&result)
                            );
                            tracing::warn!(task_id = %task.id, "task failed: {}", summary);
                            return Ok(TaskResult::failed(
                                task.id,
                                FailureKind::Execution,
                                summary,
                                result.succeeded,
                                result.failed,
                                result.skipped,
                            ));
                        }
                    }
                }
                Err(ExecutionError::Cancelled {
                    succeeded,
                    failed,
                    skipped,
                }) => {
                    self.finalize_memory(&task.id, &pending_memory)?;
                    task.status = TaskStatus::Failed;
                    tracing::info!(task_id = %task.id, "task cancelled");
                    return Ok(TaskResult::failed(
                        task.id,
                        FailureKind::Cancelled,
                        "cancelled".to_string(),
                        succeeded,
                        failed,
                        skipped,
                    ));
                }
                Err(ExecutionError::AllStepsFailed { failed, skipped }) => {
                    // 全败：Executing → Failed，不重规划
                    self.finalize_memory(&task.id, &pending_memory)?;
                    task.status = TaskStatus::Failed;
                    let summary = format!("execution failed: no subtask succeeded ({:?})", failed);
                    tracing::warn!(task_id = %task.id, "task failed: {}", summary);
                    return Ok(TaskResult::failed(
                        task.id,
                        FailureKind::Execution,
                        summary,
                        Vec::new(),
                        failed,
                        skipped,
                    ));
                }
                Err(e @ (ExecutionError::InvalidPlan(_) | ExecutionError::Store(_))) => {
                    return Err(AgentError::Execution(e));
                }
            }
        }
    }

    /// inferred 偏好写入；被用户权威拒绝时写 preference_rejected 轨迹
    pub fn set_inferred_preference(
        &self,
        task_id: &str,
        key: &str,
        value: &str,
    ) -> Result<PreferenceWrite, StoreError> {
        let outcome = self
            .memory
            .set_preference(&self.namespace, key, value, SetBy::Inferred)?;
        if outcome == PreferenceWrite::RejectedUserAuthority {
            self.trace.append(
                task_id,
                TraceKind::PreferenceRejected,
                serde_json::json!({
                    "key": key,
                    "attempted_value": value,
                    "set_by": "inferred",
                    "reason": "existing user-set preference",
                }),
            )?;
        }
        Ok(outcome)
    }

    fn snapshot_context(&self) -> Result<PlanContext, StoreError> {
        Ok(PlanContext {
            memory: self.memory.snapshot(&self.namespace)?,
            preferences: self.memory.preferences_snapshot(&self.namespace)?,
        })
    }

    /// 规划失败：写 plan_failed 轨迹，任务进入 Failed 终态
    fn fail_planning(
        &self,
        mut task: Task,
        error: PlanningError,
    ) -> Result<TaskResult, AgentError> {
        self.trace.append(
            &task.id,
            TraceKind::PlanFailed,
            serde_json::json!({
                "kind": error.kind(),
                "error": error.to_string(),
            }),
        )?;
        task.status = TaskStatus::Failed;
        let summary = format!("planning failed ({}): {}", error.kind(), error);
        tracing::warn!(task_id = %task.id, "task failed: {}", summary);
        Ok(TaskResult::failed(
            task.id,
            FailureKind::Planning,
            summary,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ))
    }

    /// 终态记忆落盘：声明了 memory_key 的成功子任务输出写入记忆
    fn finalize_memory(
        &self,
        task_id: &str,
        pending: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        for (key, value) in pending {
            self.memory.put(&self.namespace, key, value, Some(task_id))?;
        }
        if !pending.is_empty() {
            tracing::info!(task_id = %task_id, records = pending.len(), "memory finalized");
        }
        Ok(())
    }
}

/// 收集一轮执行中待写入记忆的 (memory_key, output)
fn collect_memory_writes(
    plan: &Plan,
    result: &ExecutionResult,
    pending: &mut HashMap<String, String>,
) {
    for step in &plan.steps {
        let Some(key) = &step.memory_key else {
            continue;
        };
        if let Some(output) = result.outputs.get(&step.id) {
            pending.insert(key.clone(), output.clone());
        }
    }
}

/// 部分失败的可读摘要（重规划 prompt 与对外 error_summary 共用）
fn failure_summary(result: &ExecutionResult) -> String {
    let mut parts = Vec::new();
    for id in &result.failed {
        let reason = result
            .records
            .iter()
            .rev()
            .find(|r| &r.subtask_id == id)
            .and_then(|r| r.error.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        parts.push(format!("step {} failed: {}", id, reason));
    }
    if !result.skipped.is_empty() {
        parts.push(format!("skipped: {}", result.skipped.join(", ")));
    }
    parts.join("; ")
}
