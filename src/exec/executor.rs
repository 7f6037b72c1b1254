//! 计划执行器
//!
//! 波前调度：依赖全部成功的子任务进入就绪集，互不依赖的子任务在 JoinSet 上并发执行，
//! 并发度由 Semaphore 限制。Transient 错误按 RetryPolicy 有界重试；永久失败使其
//! 全部传递依赖者标记为 skipped、不再执行，独立分支继续。取消仅在子任务边界生效：
//! 在途调用允许完成或超时，未触达的子任务转为 skipped。
//! 每个子任务写入 step_started 与 step_finished / step_failed 轨迹。
//! 计划层面的重试（重规划 / 放弃）属于 Orchestrator，这里不做。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionError, ToolError};
use crate::exec::RetryPolicy;
use crate::plan::{Plan, PlanGraph, Subtask, SubtaskStatus};
use crate::store::{DecisionTrace, TraceKind};
use crate::tools::ToolInvoker;

/// 一次工具调用的不可变记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub subtask_id: String,
    pub tool_name: String,
    pub inputs: serde_json::Value,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 计划级结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// 全部子任务成功
    Completed,
    /// 部分成功：含 failed / skipped
    PartialFailure,
}

/// 执行结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub status: ExecutionStatus,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub outputs: HashMap<String, String>,
    pub records: Vec<ToolRecord>,
}

/// 单个子任务的执行产物（spawn 任务的返回值）
struct StepOutcome {
    id: String,
    result: Result<String, ToolError>,
    record: Option<ToolRecord>,
    attempts: u32,
}

/// 执行器
pub struct Executor {
    invoker: Arc<ToolInvoker>,
    trace: Arc<DecisionTrace>,
    retry: RetryPolicy,
    max_parallel: usize,
}

impl Executor {
    pub fn new(
        invoker: Arc<ToolInvoker>,
        trace: Arc<DecisionTrace>,
        retry: RetryPolicy,
        max_parallel: usize,
    ) -> Self {
        Self {
            invoker,
            trace,
            retry,
            max_parallel: max_parallel.max(1),
        }
    }

    /// 执行计划；部分失败不是错误（见 ExecutionResult），
    /// 全败与取消作为 ExecutionError 返回
    pub async fn execute(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut graph = PlanGraph::build(&plan.steps)
            .map_err(|e| ExecutionError::InvalidPlan(e.to_string()))?;

        let steps: HashMap<String, Subtask> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let order: Vec<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
        let mut status: HashMap<String, SubtaskStatus> = order
            .iter()
            .map(|id| (id.clone(), SubtaskStatus::Pending))
            .collect();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut records: Vec<ToolRecord> = Vec::new();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join: JoinSet<StepOutcome> = JoinSet::new();
        let mut ready = graph.ready();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                tracing::info!(plan_id = %plan.id, "cancellation requested, draining in-flight subtasks");
            }
            if cancelled {
                // 未派发的子任务留在 Pending，收尾时统一转 Skipped
                ready.clear();
            }

            for id in ready.drain(..) {
                let step = steps
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| ExecutionError::InvalidPlan(format!("unknown subtask {}", id)))?;
                status.insert(id.clone(), SubtaskStatus::Running);
                self.trace.append(
                    &plan.task_id,
                    TraceKind::StepStarted,
                    serde_json::json!({
                        "subtask_id": id,
                        "tool": step.tool_name,
                        "inputs": step.inputs,
                    }),
                )?;

                let invoker = Arc::clone(&self.invoker);
                let retry = self.retry;
                let sem = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                join.spawn(run_subtask(step, invoker, retry, sem, cancel));
            }

            let Some(joined) = join.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(o) => o,
                Err(e) => {
                    tracing::error!(error = %e, "subtask join failed");
                    continue;
                }
            };

            let id = outcome.id.clone();
            if let Some(record) = outcome.record {
                records.push(record);
            }

            match outcome.result {
                Ok(output) => {
                    status.insert(id.clone(), SubtaskStatus::Succeeded);
                    self.trace.append(
                        &plan.task_id,
                        TraceKind::StepFinished,
                        serde_json::json!({
                            "subtask_id": id,
                            "output": output,
                            "attempts": outcome.attempts,
                        }),
                    )?;
                    outputs.insert(id.clone(), output);

                    let newly = graph.mark_succeeded(&id);
                    if !cancelled {
                        ready.extend(
                            newly
                                .into_iter()
                                .filter(|n| status[n] == SubtaskStatus::Pending),
                        );
                    }
                }
                Err(err) => {
                    status.insert(id.clone(), SubtaskStatus::Failed);
                    // 失败传播：全部传递依赖者跳过，独立分支不受影响
                    let mut skipped_now: Vec<String> = graph
                        .dependents_transitive(&id)
                        .into_iter()
                        .filter(|d| status[d] == SubtaskStatus::Pending)
                        .collect();
                    skipped_now.sort();
                    for s in &skipped_now {
                        status.insert(s.clone(), SubtaskStatus::Skipped);
                    }
                    self.trace.append(
                        &plan.task_id,
                        TraceKind::StepFailed,
                        serde_json::json!({
                            "subtask_id": id,
                            "error": err.to_string(),
                            "attempts": outcome.attempts,
                            "skipped": skipped_now,
                        }),
                    )?;
                }
            }
        }

        // 收尾：仍 Pending 的子任务（取消或依赖未满足）转 Skipped
        for id in &order {
            if status[id] == SubtaskStatus::Pending {
                status.insert(id.clone(), SubtaskStatus::Skipped);
            }
        }

        let collect = |want: SubtaskStatus| -> Vec<String> {
            order
                .iter()
                .filter(|id| status[*id] == want)
                .cloned()
                .collect()
        };
        let succeeded = collect(SubtaskStatus::Succeeded);
        let failed = collect(SubtaskStatus::Failed);
        let skipped = collect(SubtaskStatus::Skipped);

        // 取消到达时若已全部成功，按完成处理
        if cancelled && !(failed.is_empty() && skipped.is_empty()) {
            return Err(ExecutionError::Cancelled {
                succeeded,
                failed,
                skipped,
            });
        }
        if failed.is_empty() {
            return Ok(ExecutionResult {
                plan_id: plan.id.clone(),
                status: ExecutionStatus::Completed,
                succeeded,
                failed,
                skipped,
                outputs,
                records,
            });
        }
        if succeeded.is_empty() {
            return Err(ExecutionError::AllStepsFailed { failed, skipped });
        }
        Ok(ExecutionResult {
            plan_id: plan.id.clone(),
            status: ExecutionStatus::PartialFailure,
            succeeded,
            failed,
            skipped,
            outputs,
            records,
        })
    }
}

/// 单个子任务：取信号量许可 → 调用工具（Transient 有界重试）→ 产出记录。
/// 纯推理步骤（无工具）直接成功，描述即输出。
async fn run_subtask(
    step: Subtask,
    invoker: Arc<ToolInvoker>,
    retry: RetryPolicy,
    sem: Arc<Semaphore>,
    cancel: CancellationToken,
) -> StepOutcome {
    let Some(tool_name) = step.tool_name.clone() else {
        return StepOutcome {
            id: step.id,
            result: Ok(step.description),
            record: None,
            attempts: 0,
        };
    };

    let _permit = sem.acquire_owned().await.expect("semaphore closed");
    let started_at = Utc::now();
    let mut attempts = 0u32;
    let result = loop {
        attempts += 1;
        match invoker.invoke(&tool_name, step.inputs.clone()).await {
            Ok(output) => break Ok(output),
            Err(e) if e.is_transient() && attempts < retry.max_attempts => {
                // 取消后不再发起新的重试，让当前失败定格
                if cancel.is_cancelled() {
                    break Err(e);
                }
                let delay = retry.delay(attempts - 1);
                tracing::warn!(
                    subtask = %step.id,
                    tool = %tool_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient tool error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };
    let finished_at = Utc::now();

    let record = ToolRecord {
        subtask_id: step.id.clone(),
        tool_name,
        inputs: step.inputs.clone(),
        output: result.as_ref().ok().cloned(),
        error: result.as_ref().err().map(|e| e.to_string()),
        attempts,
        started_at,
        finished_at,
    };

    StepOutcome {
        id: step.id,
        result,
        record: Some(record),
        attempts,
    }
}
