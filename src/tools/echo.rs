//! Echo 工具（测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Tool;

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Inputs: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn invoke(&self, inputs: Value) -> Result<String, ToolError> {
        let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or("");
        Ok(text.to_string())
    }
}
