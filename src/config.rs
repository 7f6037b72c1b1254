//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PORTER__*` 覆盖（双下划线表示嵌套，
//! 如 `PORTER__INFERENCE__MODEL=gpt-4o-mini`）。
//! 重试界、退避形状、重规划预算、评分范围等策略值都在这里给出文档化默认值。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub retry: RetrySection,
    pub inference: InferenceSection,
    pub tools: ToolsSection,
    pub feedback: FeedbackSection,
    pub storage: StorageSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工具输出目录（doc_write 等），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [agent] 段：编排策略
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 记忆 / 偏好的命名空间（多租户部署时按调用方区分）
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// 重规划预算：Executing → Planning 自环的次数上限
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// 互不依赖子任务的最大并发数
    #[serde(default = "default_max_parallel_subtasks")]
    pub max_parallel_subtasks: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_replans: default_max_replans(),
            max_parallel_subtasks: default_max_parallel_subtasks(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_max_replans() -> u32 {
    1
}

fn default_max_parallel_subtasks() -> usize {
    3
}

/// [retry] 段：子任务瞬时错误的重试与退避
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// 总尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

/// [inference] 段：推理后端与超时
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSection {
    /// 后端：openai（兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次推理调用超时（秒）
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
    /// RateLimited 的退避重试次数
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeout_secs: default_inference_timeout_secs(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    60
}

fn default_rate_limit_retries() -> u32 {
    3
}

/// [tools] 段：工具超时与 fetch 配置
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            fetch: FetchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.fetch] 段：抓取 URL 的超时、最大字符数、域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "en.wikipedia.org".into(),
        "api.open-meteo.com".into(),
        "openweathermap.org".into(),
        "github.com".into(),
        "raw.githubusercontent.com".into(),
        "docs.rs".into(),
        "crates.io".into(),
        "news.ycombinator.com".into(),
    ]
}

/// [feedback] 段：评分范围
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSection {
    #[serde(default = "default_min_rating")]
    pub min_rating: i64,
    #[serde(default = "default_max_rating")]
    pub max_rating: i64,
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            min_rating: default_min_rating(),
            max_rating: default_max_rating(),
        }
    }
}

fn default_min_rating() -> i64 {
    1
}

fn default_max_rating() -> i64 {
    5
}

/// [storage] 段：三个库文件（memory.db / trace.db / feedback.db）所在目录
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

/// 从 config 目录加载配置，环境变量 PORTER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PORTER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PORTER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
