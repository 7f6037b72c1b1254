//! Mock 推理客户端（用于测试与无 Key 运行）
//!
//! scripted：按脚本顺序返回预设响应（可含错误），供测试注入限流 / 超时等场景；
//! 脚本耗尽或未设脚本时，回退为「单步 echo 计划」，便于本地跑通完整流程。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::InferenceError;
use crate::infer::InferenceClient;

/// Mock 客户端：脚本化响应 + 单步 echo 回退
#[derive(Debug, Default)]
pub struct MockInference {
    script: Mutex<VecDeque<Result<String, InferenceError>>>,
}

impl MockInference {
    /// 按脚本顺序返回响应；耗尽后回退为单步 echo 计划
    pub fn scripted<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, InferenceError>>,
    {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
        }
    }

    /// 便捷构造：每个元素是一份完整的计划 JSON
    pub fn with_plans<I>(plans: I) -> Self
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        Self::scripted(plans.into_iter().map(|p| Ok(p.to_string())))
    }
}

/// 回退计划：把任务描述原样 echo 一步
fn fallback_plan(user: &str) -> String {
    let description: String = user.chars().take(120).collect();
    serde_json::json!({
        "steps": [{
            "id": "s1",
            "description": format!("Echo the task: {}", description),
            "tool": "echo",
            "inputs": { "text": description },
        }]
    })
    .to_string()
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn infer(&self, _system: &str, user: &str) -> Result<String, InferenceError> {
        let next = self.script.lock().expect("mock script mutex").pop_front();
        match next {
            Some(r) => r,
            None => Ok(fallback_plan(user)),
        }
    }
}
