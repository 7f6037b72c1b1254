//! 计划与子任务类型
//!
//! Plan 由 Planner 创建后只读；重规划产生引用同一 task_id 的新 Plan，不原地修改。
//! PlanDraft / StepDraft 是推理输出的反序列化形状，同时用 schemars 生成
//! JSON Schema 拼入规划 prompt，约束模型输出格式。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::ids::new_id;

/// 子任务状态；执行期间 Executor 是唯一写者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// 子任务：计划中的一步，可选绑定一个工具
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    /// None 表示纯推理步骤（不调用工具）
    pub tool_name: Option<String>,
    pub inputs: serde_json::Value,
    pub depends_on: Vec<String>,
    /// 成功后将输出写入记忆的 key
    pub memory_key: Option<String>,
    pub status: SubtaskStatus,
}

/// 计划：一次规划周期的产物，对应一个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task_id: String,
    pub steps: Vec<Subtask>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(task_id: &str, steps: Vec<Subtask>) -> Self {
        Self {
            id: new_id("plan"),
            task_id: task_id.to_string(),
            steps,
            created_at: Utc::now(),
        }
    }
}

/// 推理输出的计划草稿
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanDraft {
    pub steps: Vec<StepDraft>,
}

/// 推理输出的单步草稿；id 缺省时按位置补 s1..sn
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StepDraft {
    /// 步骤 id，供 depends_on 引用；缺省自动编号
    #[serde(default)]
    pub id: Option<String>,
    /// 这一步做什么
    pub description: String,
    /// 绑定的工具名；省略表示纯推理步骤
    #[serde(default)]
    pub tool: Option<String>,
    /// 工具输入（JSON 对象）
    #[serde(default)]
    pub inputs: Option<serde_json::Value>,
    /// 必须先成功的步骤 id 集合
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// 此步输出需要被记住时的记忆 key
    #[serde(default)]
    pub memory_key: Option<String>,
}

impl StepDraft {
    /// 草稿 → 子任务，id 缺省按位置补齐
    pub fn into_subtask(self, position: usize) -> Subtask {
        Subtask {
            id: self
                .id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| format!("s{}", position + 1)),
            description: self.description,
            tool_name: self.tool.filter(|s| !s.trim().is_empty()),
            inputs: self.inputs.unwrap_or_else(|| serde_json::json!({})),
            depends_on: self.depends_on,
            memory_key: self.memory_key.filter(|s| !s.trim().is_empty()),
            status: SubtaskStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let draft: PlanDraft = serde_json::from_value(serde_json::json!({
            "steps": [
                { "description": "think about it" },
                { "id": "fetch", "description": "get data", "tool": "fetch",
                  "inputs": {"url": "https://x"}, "depends_on": [] }
            ]
        }))
        .unwrap();

        let first = draft.steps[0].clone().into_subtask(0);
        assert_eq!(first.id, "s1");
        assert!(first.tool_name.is_none());
        assert_eq!(first.status, SubtaskStatus::Pending);

        let second = draft.steps[1].clone().into_subtask(1);
        assert_eq!(second.id, "fetch");
        assert_eq!(second.tool_name.as_deref(), Some("fetch"));
    }
}
