//! OpenAI 兼容推理后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 错误映射：429/限流 → RateLimited，请求超时 → Timeout，其余 → Unavailable；
//! 重试策略在 Planner 侧（仅 RateLimited 退避重试）。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::InferenceError;
use crate::infer::InferenceClient;

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiInference {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiInference {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

/// OpenAIError → InferenceError 分类
fn map_error(e: OpenAIError) -> InferenceError {
    match e {
        OpenAIError::Reqwest(r) if r.is_timeout() => InferenceError::Timeout,
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().map(|c| c.to_string()).unwrap_or_default();
            if code.contains("rate_limit") || api.message.to_lowercase().contains("rate limit") {
                InferenceError::RateLimited
            } else {
                InferenceError::Unavailable(api.message)
            }
        }
        other => InferenceError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl InferenceClient for OpenAiInference {
    async fn infer(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(|e| InferenceError::Unavailable(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user.to_string())
                    .build()
                    .map_err(|e| InferenceError::Unavailable(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.2)
            .build()
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}
