//! 推理能力边界
//!
//! Planner 通过 InferenceClient 请求结构化分解；边界是纯请求/响应，
//! 超时由调用方（Planner）施加。后端：OpenAI 兼容端点 / Mock。

pub mod json;
pub mod mock;
pub mod openai;

use async_trait::async_trait;

pub use crate::core::InferenceError;
pub use mock::MockInference;
pub use openai::OpenAiInference;

/// 推理客户端 trait：system + user 两段提示，返回模型原始文本
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, system: &str, user: &str) -> Result<String, InferenceError>;
}
