//! Planner：任务分解
//!
//! 流程：拼 system（规则 + 工具列表 + schemars 生成的计划 schema）与 user
//! （任务描述 + 记忆/偏好快照）→ 在超时内调用推理 → 提取 JSON → 本地确定性校验
//! （非空、依赖存在、无环、工具已注册）→ 写入 plan_created 轨迹。
//! RateLimited 退避重试，Timeout / Unavailable 不重试。
//! 图结构合法性永远由本地校验决定，与推理后端输出质量无关。

use std::sync::Arc;
use std::time::Duration;

use schemars::schema_for;

use crate::core::{InferenceError, PlanningError, Task};
use crate::exec::RetryPolicy;
use crate::infer::{json::extract_json, InferenceClient};
use crate::plan::graph::PlanGraph;
use crate::plan::types::{Plan, PlanDraft, Subtask};
use crate::store::{DecisionTrace, MemoryRecord, Preference, TraceKind};
use crate::tools::ToolRegistry;

/// 规划上下文：调用时刻的只读快照（无订阅，不随后续写入变化）
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub memory: Vec<MemoryRecord>,
    pub preferences: Vec<Preference>,
}

/// Planner：持有推理客户端与轨迹存储
pub struct Planner {
    infer: Arc<dyn InferenceClient>,
    trace: Arc<DecisionTrace>,
    timeout: Duration,
    rate_limit_retries: u32,
    backoff: RetryPolicy,
}

impl Planner {
    pub fn new(
        infer: Arc<dyn InferenceClient>,
        trace: Arc<DecisionTrace>,
        timeout_secs: u64,
        rate_limit_retries: u32,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            infer,
            trace,
            timeout: Duration::from_secs(timeout_secs),
            rate_limit_retries,
            backoff,
        }
    }

    /// 首次规划：产出 Plan 并写入 plan_created 轨迹
    pub async fn plan(
        &self,
        task: &Task,
        ctx: &PlanContext,
        tools: &ToolRegistry,
    ) -> Result<Plan, PlanningError> {
        let plan = self.plan_inner(task, ctx, tools, None).await?;
        self.trace_plan_created(&plan)?;
        Ok(plan)
    }

    /// 重规划：带上一轮失败上下文，产出新 Plan 并写入 replan + plan_created 轨迹
    pub async fn replan(
        &self,
        task: &Task,
        ctx: &PlanContext,
        tools: &ToolRegistry,
        prior: &Plan,
        failure_summary: &str,
    ) -> Result<Plan, PlanningError> {
        let plan = self
            .plan_inner(task, ctx, tools, Some(failure_summary))
            .await?;
        self.trace.append(
            &task.id,
            TraceKind::Replan,
            serde_json::json!({
                "prior_plan_id": prior.id,
                "plan_id": plan.id,
                "reason": failure_summary,
            }),
        )?;
        self.trace_plan_created(&plan)?;
        Ok(plan)
    }

    async fn plan_inner(
        &self,
        task: &Task,
        ctx: &PlanContext,
        tools: &ToolRegistry,
        failure_summary: Option<&str>,
    ) -> Result<Plan, PlanningError> {
        if task.description.trim().is_empty() {
            return Err(PlanningError::EmptyDescription);
        }

        let system = build_system_prompt(tools);
        let user = build_user_prompt(task, ctx, failure_summary);

        let output = self.call_inference(&system, &user).await?;
        let value = extract_json(&output)
            .map_err(|e| PlanningError::Inference(InferenceError::Unavailable(e)))?;
        let draft: PlanDraft = serde_json::from_value(value).map_err(|e| {
            PlanningError::Inference(InferenceError::Unavailable(format!(
                "plan draft did not match schema: {}",
                e
            )))
        })?;

        let steps = validate_draft(draft, tools)?;
        Ok(Plan::new(&task.id, steps))
    }

    /// 推理调用：每次尝试施加超时；仅 RateLimited 退避重试
    async fn call_inference(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::time::timeout(self.timeout, self.infer.infer(system, user)).await;
            match result {
                Err(_) => return Err(InferenceError::Timeout),
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(InferenceError::RateLimited)) if attempt < self.rate_limit_retries => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "inference rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    fn trace_plan_created(&self, plan: &Plan) -> Result<(), PlanningError> {
        let snapshot = serde_json::to_value(plan).unwrap_or_else(|_| serde_json::json!({}));
        self.trace.append(
            &plan.task_id,
            TraceKind::PlanCreated,
            serde_json::json!({ "plan": snapshot }),
        )?;
        Ok(())
    }
}

/// 草稿校验：非空、工具已注册、图合法（重复 id / 悬空依赖 / 环）
fn validate_draft(draft: PlanDraft, tools: &ToolRegistry) -> Result<Vec<Subtask>, PlanningError> {
    if draft.steps.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }

    let steps: Vec<Subtask> = draft
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.into_subtask(i))
        .collect();

    for step in &steps {
        if let Some(tool) = &step.tool_name {
            if !tools.contains(tool) {
                return Err(PlanningError::UnknownTool(tool.clone()));
            }
        }
    }

    PlanGraph::build(&steps).map_err(|e| PlanningError::InvalidGraph(e.to_string()))?;
    Ok(steps)
}

fn build_system_prompt(tools: &ToolRegistry) -> String {
    let schema = schema_for!(PlanDraft);
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    let tool_lines: String = tools
        .tool_descriptions()
        .into_iter()
        .map(|(name, desc)| format!("- {}: {}", name, desc))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a task-planning agent. Decompose the task into an ordered plan.

Return ONLY valid JSON matching this schema:
{schema_json}

Rules:
- Produce 1 to 7 steps.
- Every step either sets "tool" to one of the available tools, or omits it for a pure reasoning step.
- "depends_on" lists ids of steps that must succeed first; the dependency graph must be acyclic.
- Give each step a short unique "id" (e.g. "fetch", "summarize").
- Set "memory_key" on a step whose output should be remembered for future tasks.
- "inputs" must match the chosen tool's parameter schema.

Available tools:
{tool_lines}"#
    )
}

fn build_user_prompt(task: &Task, ctx: &PlanContext, failure_summary: Option<&str>) -> String {
    let mut sections = vec![format!("Task: {}", task.description.trim())];

    if !ctx.memory.is_empty() {
        let lines: String = ctx
            .memory
            .iter()
            .map(|m| format!("- {} = {}", m.key, m.value))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Known facts:\n{}", lines));
    }

    if !ctx.preferences.is_empty() {
        let lines: String = ctx
            .preferences
            .iter()
            .map(|p| format!("- {} = {} ({})", p.key, p.value, p.set_by.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("User preferences:\n{}", lines));
    }

    if let Some(summary) = failure_summary {
        sections.push(format!(
            "The previous plan failed partway; plan around this:\n{}",
            summary
        ));
    }

    sections.push("Return the plan JSON.".to_string());
    sections.join("\n\n")
}
