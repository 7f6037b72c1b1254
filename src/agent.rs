//! 无头 Agent 门面
//!
//! 供上层（HTTP API、CLI 等）调用的无界面入口：从配置装配存储、工具、
//! Planner / Executor / Orchestrator，暴露任务提交、取消、反馈、偏好、
//! 轨迹读取与记忆重置。一次提交跑一个任务到终态；多个任务可并发提交，
//! 共享三个持久化存储。

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, FeedbackError, Orchestrator, StoreError, TaskResult};
use crate::exec::{Executor, RetryPolicy};
use crate::infer::{InferenceClient, MockInference, OpenAiInference};
use crate::plan::Planner;
use crate::store::{
    DecisionTrace, DecisionTraceEntry, FeedbackEntry, FeedbackLog, MemoryStore, PreferenceWrite,
    SetBy,
};
use crate::tools::{DocWriteTool, EchoTool, FetchTool, ToolInvoker, ToolRegistry};

/// Agent：编排器 + 共享存储
pub struct Agent {
    orchestrator: Orchestrator,
    memory: Arc<MemoryStore>,
    trace: Arc<DecisionTrace>,
    feedback: Arc<FeedbackLog>,
    namespace: String,
}

/// 根据配置与环境变量选择推理后端（OpenAI 兼容 / Mock）
pub fn create_inference_from_config(cfg: &AppConfig) -> Arc<dyn InferenceClient> {
    let provider = cfg.inference.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();

    if provider == "openai" && has_key {
        tracing::info!("Using OpenAI-compatible inference ({})", cfg.inference.model);
        Arc::new(OpenAiInference::new(
            cfg.inference.base_url.as_deref(),
            &cfg.inference.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock inference");
        Arc::new(MockInference::default())
    }
}

/// 内置工具注册：echo、doc_write、fetch
pub fn default_registry(cfg: &AppConfig, workspace: &PathBuf) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(DocWriteTool::new(workspace.clone()));
    tools.register(FetchTool::new(
        cfg.tools.fetch.allowed_domains.clone(),
        cfg.tools.fetch.timeout_secs,
        cfg.tools.fetch.max_result_chars,
    ));
    tools
}

impl Agent {
    /// 从配置装配：打开三个库文件，注册内置工具，选择推理后端
    pub fn new(cfg: &AppConfig, infer: Arc<dyn InferenceClient>) -> Result<Self, AgentError> {
        let workspace = cfg
            .app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("./workspace"));
        let registry = default_registry(cfg, &workspace);
        Self::with_registry(cfg, infer, registry)
    }

    /// 注入自定义工具注册表（测试或嵌入方扩展工具时用）
    pub fn with_registry(
        cfg: &AppConfig,
        infer: Arc<dyn InferenceClient>,
        registry: ToolRegistry,
    ) -> Result<Self, AgentError> {
        let state_dir = &cfg.storage.state_dir;
        let memory = Arc::new(MemoryStore::open(&state_dir.join("memory.db")).map_err(AgentError::Store)?);
        let trace = Arc::new(DecisionTrace::open(&state_dir.join("trace.db")).map_err(AgentError::Store)?);
        let feedback = Arc::new(
            FeedbackLog::open(
                &state_dir.join("feedback.db"),
                cfg.feedback.min_rating,
                cfg.feedback.max_rating,
            )
            .map_err(AgentError::Store)?,
        );

        Ok(Self::assemble(cfg, infer, registry, memory, trace, feedback))
    }

    /// 注入现成的存储（内存库测试用）
    pub fn assemble(
        cfg: &AppConfig,
        infer: Arc<dyn InferenceClient>,
        registry: ToolRegistry,
        memory: Arc<MemoryStore>,
        trace: Arc<DecisionTrace>,
        feedback: Arc<FeedbackLog>,
    ) -> Self {
        let tools = Arc::new(registry);
        let retry = RetryPolicy::new(
            cfg.retry.max_attempts,
            cfg.retry.backoff_base_ms,
            cfg.retry.backoff_cap_ms,
        );

        let planner = Planner::new(
            infer,
            Arc::clone(&trace),
            cfg.inference.timeout_secs,
            cfg.inference.rate_limit_retries,
            retry,
        );
        let invoker = Arc::new(ToolInvoker::new(
            Arc::clone(&tools),
            cfg.tools.tool_timeout_secs,
        ));
        let executor = Executor::new(
            invoker,
            Arc::clone(&trace),
            retry,
            cfg.agent.max_parallel_subtasks,
        );
        let orchestrator = Orchestrator::new(
            planner,
            executor,
            Arc::clone(&tools),
            Arc::clone(&memory),
            Arc::clone(&trace),
            cfg.agent.namespace.clone(),
            cfg.agent.max_replans,
        );

        Self {
            orchestrator,
            memory,
            trace,
            feedback,
            namespace: cfg.agent.namespace.clone(),
        }
    }

    /// 提交任务并运行到终态（同步变体；异步投递属于部署层）
    pub async fn submit(&self, description: &str) -> Result<TaskResult, AgentError> {
        self.submit_with_cancel(description, CancellationToken::new())
            .await
    }

    /// 提交任务，携带取消令牌：取消仅在子任务边界生效
    pub async fn submit_with_cancel(
        &self,
        description: &str,
        cancel: CancellationToken,
    ) -> Result<TaskResult, AgentError> {
        self.orchestrator.run_task(description, cancel).await
    }

    /// 提交任务，先应用调用方给出的偏好覆盖（user 来源）
    pub async fn submit_with_preferences(
        &self,
        description: &str,
        preferences: &[(String, String)],
    ) -> Result<TaskResult, AgentError> {
        for (key, value) in preferences {
            self.memory
                .set_preference(&self.namespace, key, value, SetBy::User)
                .map_err(AgentError::Store)?;
        }
        self.submit(description).await
    }

    /// 记录任务反馈；评分越界返回 InvalidFeedback
    pub fn record_feedback(
        &self,
        task_id: &str,
        rating: i64,
        comment: &str,
    ) -> Result<FeedbackEntry, FeedbackError> {
        self.feedback.record(task_id, rating, comment)
    }

    /// 读取任务的全部反馈
    pub fn feedback_for(&self, task_id: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        self.feedback.read_all(task_id)
    }

    /// 设置偏好（user / inferred；inferred 不会覆盖已有 user 条目）
    pub fn set_preference(
        &self,
        key: &str,
        value: &str,
        set_by: SetBy,
    ) -> Result<PreferenceWrite, StoreError> {
        self.memory
            .set_preference(&self.namespace, key, value, set_by)
    }

    /// 任务上下文中的 inferred 偏好写入：被拒绝时写 preference_rejected 轨迹
    pub fn set_inferred_preference_for_task(
        &self,
        task_id: &str,
        key: &str,
        value: &str,
    ) -> Result<PreferenceWrite, StoreError> {
        self.orchestrator
            .set_inferred_preference(task_id, key, value)
    }

    /// 读取任务的决策轨迹（按 sequence_no 排序）
    pub fn trace_for(&self, task_id: &str) -> Result<Vec<DecisionTraceEntry>, StoreError> {
        self.trace.read_all(task_id)
    }

    /// 读取记忆值
    pub fn memory_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.memory.get(&self.namespace, key)
    }

    /// 显式清空当前命名空间的记忆与偏好
    pub fn reset_memory(&self) -> Result<(), StoreError> {
        self.memory.clear_namespace(&self.namespace)
    }
}
