//! 任务运行集成测试
//!
//! 用脚本化 Mock 推理 + 内存库存储走完整的规划-执行-记忆-审计闭环。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use porter::agent::Agent;
use porter::config::AppConfig;
use porter::core::{FailureKind, TaskStatus, ToolError};
use porter::infer::MockInference;
use porter::store::{
    DecisionTrace, FeedbackLog, MemoryStore, PreferenceWrite, SetBy, TraceKind,
};
use porter::tools::{EchoTool, Tool, ToolRegistry};

/// 固定返回天气数据的测试工具
struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather_api"
    }
    fn description(&self) -> &str {
        "Return current weather (test stub)"
    }
    async fn invoke(&self, _inputs: serde_json::Value) -> Result<String, ToolError> {
        Ok("sunny, 22C".to_string())
    }
}

/// 慢工具：睡 300ms 后成功（取消场景里的在途调用）
struct SlowWeatherTool;

#[async_trait]
impl Tool for SlowWeatherTool {
    fn name(&self) -> &str {
        "weather_api"
    }
    fn description(&self) -> &str {
        "Slow weather fetch (test stub)"
    }
    async fn invoke(&self, _inputs: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok("sunny, 22C".to_string())
    }
}

/// 永久失败的测试工具
struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Always fails permanently (test stub)"
    }
    async fn invoke(&self, _inputs: serde_json::Value) -> Result<String, ToolError> {
        Err(ToolError::Permanent("broken by design".to_string()))
    }
}

/// 总是瞬时失败的测试工具，记录调用次数
struct FlakyTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "Always fails transiently (test stub)"
    }
    async fn invoke(&self, _inputs: serde_json::Value) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::Transient("try again".to_string()))
    }
}

/// 测试配置：退避极短，避免拖慢用例
fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.retry.max_attempts = 3;
    cfg.retry.backoff_base_ms = 1;
    cfg.retry.backoff_cap_ms = 5;
    cfg.inference.timeout_secs = 5;
    cfg.tools.tool_timeout_secs = 5;
    cfg
}

/// 内存库 Agent
fn build_agent(cfg: &AppConfig, mock: MockInference, registry: ToolRegistry) -> Agent {
    let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
    let trace = Arc::new(DecisionTrace::open_in_memory().unwrap());
    let feedback = Arc::new(
        FeedbackLog::open_in_memory(cfg.feedback.min_rating, cfg.feedback.max_rating).unwrap(),
    );
    Agent::assemble(cfg, Arc::new(mock), registry, memory, trace, feedback)
}

fn kinds(agent: &Agent, task_id: &str) -> Vec<TraceKind> {
    agent
        .trace_for(task_id)
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn test_fetch_then_summarize_completes() {
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "fetch", "description": "fetch the weather", "tool": "weather_api" },
            { "id": "summarize", "description": "summarize it", "tool": "echo",
              "inputs": { "text": "weather today: sunny, 22C" },
              "depends_on": ["fetch"], "memory_key": "weather_summary" }
        ]
    })]);
    let mut registry = ToolRegistry::new();
    registry.register(WeatherTool);
    registry.register(EchoTool);
    let agent = build_agent(&test_config(), mock, registry);

    let result = agent.submit("fetch weather and summarize").await.unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.succeeded_steps, vec!["fetch", "summarize"]);
    assert!(result.error_summary.is_none());

    // 两条 step_finished，计划快照在前
    let kinds = kinds(&agent, &result.task_id);
    assert_eq!(
        kinds,
        vec![
            TraceKind::PlanCreated,
            TraceKind::StepStarted,
            TraceKind::StepFinished,
            TraceKind::StepStarted,
            TraceKind::StepFinished,
        ]
    );

    // summarize 声明了 memory_key，终态写入一条记忆
    assert_eq!(
        agent.memory_get("weather_summary").unwrap().as_deref(),
        Some("weather today: sunny, 22C")
    );
}

#[tokio::test]
async fn test_trace_sequence_contiguous_from_one() {
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "a", "description": "x", "tool": "echo", "inputs": {"text": "1"} },
            { "id": "b", "description": "y", "tool": "echo", "inputs": {"text": "2"},
              "depends_on": ["a"] }
        ]
    })]);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let agent = build_agent(&test_config(), mock, registry);

    let result = agent.submit("two step task").await.unwrap();
    let entries = agent.trace_for(&result.task_id).unwrap();
    let seqs: Vec<i64> = entries.iter().map(|e| e.sequence_no).collect();
    let expected: Vec<i64> = (1..=entries.len() as i64).collect();
    assert_eq!(seqs, expected);
}

#[tokio::test]
async fn test_partial_failure_propagation() {
    // a → b → c，b 永久失败；预算 0，不重规划
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "a", "description": "first", "tool": "echo", "inputs": {"text": "a"} },
            { "id": "b", "description": "breaks", "tool": "broken", "depends_on": ["a"] },
            { "id": "c", "description": "never runs", "tool": "echo", "depends_on": ["b"] }
        ]
    })]);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(BrokenTool);
    let mut cfg = test_config();
    cfg.agent.max_replans = 0;
    let agent = build_agent(&cfg, mock, registry);

    let result = agent.submit("chain with failure").await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::Execution));
    assert_eq!(result.succeeded_steps, vec!["a"]);
    assert_eq!(result.failed_steps, vec!["b"]);
    assert_eq!(result.skipped_steps, vec!["c"]);

    // 对外只有分类与摘要，不暴露内部错误对象
    let summary = result.error_summary.unwrap();
    assert!(summary.contains("b"));
}

#[tokio::test]
async fn test_retry_bound_no_infinite_loop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "only", "description": "flaky step", "tool": "flaky" }
        ]
    })]);
    let mut registry = ToolRegistry::new();
    registry.register(FlakyTool {
        calls: Arc::clone(&calls),
    });
    let mut cfg = test_config();
    cfg.agent.max_replans = 0;
    let agent = build_agent(&cfg, mock, registry);

    let result = agent.submit("flaky task").await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failed_steps, vec!["only"]);
    // 恰好 max_attempts 次尝试
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_replan_then_complete() {
    // 第一版计划部分失败，重规划后的第二版全部成功
    let mock = MockInference::with_plans([
        serde_json::json!({
            "steps": [
                { "id": "good", "description": "works", "tool": "echo", "inputs": {"text": "ok"} },
                { "id": "bad", "description": "breaks", "tool": "broken" }
            ]
        }),
        serde_json::json!({
            "steps": [
                { "id": "retry", "description": "alternative route", "tool": "echo",
                  "inputs": {"text": "recovered"} }
            ]
        }),
    ]);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(BrokenTool);
    let mut cfg = test_config();
    cfg.agent.max_replans = 1;
    let agent = build_agent(&cfg, mock, registry);

    let result = agent.submit("task with one replan").await.unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.succeeded_steps, vec!["retry"]);

    let kinds = kinds(&agent, &result.task_id);
    assert!(kinds.contains(&TraceKind::Replan));
    // replan 之后跟着第二份计划快照
    let replan_pos = kinds.iter().position(|k| *k == TraceKind::Replan).unwrap();
    assert_eq!(kinds[replan_pos + 1], TraceKind::PlanCreated);
}

#[tokio::test]
async fn test_replan_budget_exhausted() {
    // 预算 1：两版计划都部分失败，第二次部分失败直接终止
    let plan = serde_json::json!({
        "steps": [
            { "id": "good", "description": "works", "tool": "echo", "inputs": {"text": "ok"} },
            { "id": "bad", "description": "breaks", "tool": "broken" }
        ]
    });
    let mock = MockInference::with_plans([plan.clone(), plan]);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(BrokenTool);
    let mut cfg = test_config();
    cfg.agent.max_replans = 1;
    let agent = build_agent(&cfg, mock, registry);

    let result = agent.submit("never recovers").await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::Execution));
    assert!(result
        .error_summary
        .unwrap()
        .contains("replan budget exhausted"));

    // 恰好一次 replan
    let kinds = kinds(&agent, &result.task_id);
    assert_eq!(
        kinds.iter().filter(|k| **k == TraceKind::Replan).count(),
        1
    );
}

#[tokio::test]
async fn test_planning_cycle_fails_task() {
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "a", "description": "x", "depends_on": ["c"] },
            { "id": "b", "description": "y", "depends_on": ["a"] },
            { "id": "c", "description": "z", "depends_on": ["b"] }
        ]
    })]);
    let agent = build_agent(&test_config(), mock, ToolRegistry::new());

    let result = agent.submit("cyclic plan").await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::Planning));
    assert!(result.error_summary.unwrap().contains("invalid_graph"));
    assert!(result.succeeded_steps.is_empty());

    // 失败原因进入审计轨迹
    let entries = agent.trace_for(&result.task_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, TraceKind::PlanFailed);
}

#[tokio::test]
async fn test_cancellation_mid_flight() {
    // fetch 在途时取消：fetch 允许完成，summarize 直接 skipped
    let mock = MockInference::with_plans([serde_json::json!({
        "steps": [
            { "id": "fetch", "description": "slow fetch", "tool": "weather_api" },
            { "id": "summarize", "description": "summarize", "tool": "echo",
              "inputs": {"text": "s"}, "depends_on": ["fetch"] }
        ]
    })]);
    let mut registry = ToolRegistry::new();
    registry.register(SlowWeatherTool);
    registry.register(EchoTool);
    let agent = build_agent(&test_config(), mock, registry);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = agent
        .submit_with_cancel("cancelled weather task", token)
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::Cancelled));
    // 在途的 fetch 跑完，summarize 未被触达
    assert_eq!(result.succeeded_steps, vec!["fetch"]);
    assert_eq!(result.skipped_steps, vec!["summarize"]);
    assert!(result.failed_steps.is_empty());
}

#[tokio::test]
async fn test_preferences_override_and_user_authority() {
    let agent = build_agent(&test_config(), MockInference::default(), {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r
    });

    // 提交边界的偏好覆盖按 user 来源写入
    let result = agent
        .submit_with_preferences(
            "echo something",
            &[("tone".to_string(), "concise".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::Completed);

    // inferred 覆盖被拒绝，且拒绝进入该任务的轨迹
    let outcome = agent
        .set_inferred_preference_for_task(&result.task_id, "tone", "verbose")
        .unwrap();
    assert_eq!(outcome, PreferenceWrite::RejectedUserAuthority);
    let entries = agent.trace_for(&result.task_id).unwrap();
    assert_eq!(
        entries.last().unwrap().kind,
        TraceKind::PreferenceRejected
    );

    // 两次读取值一致，仍是 user 值
    assert_eq!(
        agent.set_preference("tone", "concise", SetBy::User).unwrap(),
        PreferenceWrite::Applied
    );
}

#[tokio::test]
async fn test_feedback_recorded_and_bounded() {
    let agent = build_agent(&test_config(), MockInference::default(), {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r
    });
    let result = agent.submit("simple echo").await.unwrap();

    agent
        .record_feedback(&result.task_id, 5, "did the thing")
        .unwrap();
    assert!(agent.record_feedback(&result.task_id, 9, "too good").is_err());

    let entries = agent.feedback_for(&result.task_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].rating, 5);
}

#[tokio::test]
async fn test_memory_persists_across_tasks() {
    // 第一个任务写入记忆，第二个任务的规划 prompt 能看到它（这里验证存储侧）
    let mock = MockInference::with_plans([
        serde_json::json!({
            "steps": [
                { "id": "learn", "description": "learn a fact", "tool": "echo",
                  "inputs": {"text": "the capital is Lisbon"}, "memory_key": "capital" }
            ]
        }),
        serde_json::json!({
            "steps": [
                { "id": "use", "description": "use the fact", "tool": "echo",
                  "inputs": {"text": "recalled"} }
            ]
        }),
    ]);
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let agent = build_agent(&test_config(), mock, registry);

    let first = agent.submit("learn something").await.unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(
        agent.memory_get("capital").unwrap().as_deref(),
        Some("the capital is Lisbon")
    );

    let second = agent.submit("use what you learned").await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);

    // 显式清空后记忆不再存在
    agent.reset_memory().unwrap();
    assert_eq!(agent.memory_get("capital").unwrap(), None);
}
