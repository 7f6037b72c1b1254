//! 工具调用器
//!
//! 持有 ToolRegistry 与全局超时：invoke(tool_name, inputs) 在超时内调用工具，
//! 超时归为 Transient（上游慢与瞬时故障不可区分，走同一套有界重试）；
//! 未注册工具归为 Permanent（规划期已校验，这里是防御性复查）。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::ToolRegistry;

/// 工具调用器：对每次调用施加超时并统一分类错误
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 调用指定工具；超时 → Transient，未注册 → Permanent；输出 JSON 审计日志
    pub async fn invoke(
        &self,
        tool_name: &str,
        inputs: serde_json::Value,
    ) -> Result<String, ToolError> {
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(ToolError::Permanent(format!("unknown tool: {}", tool_name)));
        };

        let start = Instant::now();
        let inputs_preview = inputs_preview(&inputs);
        let result = timeout(self.timeout, tool.invoke(inputs)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(ToolError::Transient(_))) => (false, "transient"),
            Ok(Err(ToolError::Permanent(_))) => (false, "permanent"),
            Ok(Err(ToolError::InvalidInput(_))) => (false, "invalid_input"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "inputs_preview": inputs_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Transient(format!(
                "tool {} timed out after {}s",
                tool_name,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn inputs_preview(inputs: &serde_json::Value) -> String {
    let s = inputs.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps past the timeout"
        }
        async fn invoke(&self, _inputs: serde_json::Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".to_string())
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_permanent() {
        let invoker = ToolInvoker::new(Arc::new(ToolRegistry::new()), 5);
        let err = invoker.invoke("missing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Permanent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool);
        let invoker = ToolInvoker::new(Arc::new(registry), 1);
        let err = invoker.invoke("sleepy", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Transient(_)));
    }

    #[tokio::test]
    async fn test_ok_passthrough() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let invoker = ToolInvoker::new(Arc::new(registry), 5);
        let out = invoker
            .invoke("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }
}
