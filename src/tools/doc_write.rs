//! doc_write 工具：结构化 markdown 文档生成
//!
//! 将 content 渲染为 markdown：若已是完整结构化文档（# 标题 + 多个小节）则原样保留，
//! 否则套入通用模板并锚定任务目标；清洗常见占位符（[Insert...]、TBD、lorem ipsum）。
//! 渲染结果写入 workspace/docs/<slug>.md 并作为工具输出返回。

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Tool;

const BANNED_TOKENS: [&str; 5] = ["[insert", "bullet 1", "bullet 2", "tbd", "lorem ipsum"];

/// doc_write 工具：在 workspace 下生成文档
pub struct DocWriteTool {
    docs_dir: PathBuf,
}

impl DocWriteTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: workspace.into().join("docs"),
        }
    }
}

/// 清洗模板占位符
fn scrub_placeholders(text: &str) -> String {
    let lowered = text.to_lowercase();
    if !BANNED_TOKENS.iter().any(|t| lowered.contains(t)) {
        return text.trim().to_string();
    }
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let low = line.to_lowercase();
        if BANNED_TOKENS.iter().any(|t| low.contains(t)) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// 是否已是完整结构化文档（避免二次套模板）
fn looks_like_full_doc(md: &str) -> bool {
    let md = md.trim();
    if !md.starts_with('#') {
        return false;
    }
    let sections = md.matches("\n## ").count() + md.matches("\n### ").count();
    sections >= 2
}

/// 文件名 slug：小写、空白转 -、仅保留字母数字与 -
fn slugify(title: &str) -> String {
    let mut slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                '-'
            }
        })
        .collect();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.chars().take(64).collect()
    }
}

fn render(title: &str, body: &str, goal: &str) -> String {
    if looks_like_full_doc(body) {
        return body.to_string();
    }
    let objective = if goal.is_empty() {
        "Define the objective for this document."
    } else {
        goal
    };
    format!(
        "# {title}\n\n## Objective\n{objective}\n\n## Key Points\n{body}\n\n## Acceptance Criteria\n- Define how completion is verified\n"
    )
}

#[async_trait]
impl Tool for DocWriteTool {
    fn name(&self) -> &str {
        "doc_write"
    }

    fn description(&self) -> &str {
        "Write a structured markdown document into the workspace. Inputs: {\"title\": \"...\", \"content\": \"markdown\", \"goal\": \"optional task goal\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "content": { "type": "string" },
                "goal": { "type": "string" }
            },
            "required": ["title", "content"]
        })
    }

    async fn invoke(&self, inputs: Value) -> Result<String, ToolError> {
        let title = inputs
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidInput("doc_write requires a title".to_string()))?;
        let content = inputs
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ToolError::InvalidInput("doc_write requires string content".to_string())
            })?;
        let goal = inputs.get("goal").and_then(|v| v.as_str()).unwrap_or("");

        let body = scrub_placeholders(content);
        let doc = render(title, &body, goal);

        std::fs::create_dir_all(&self.docs_dir)
            .map_err(|e| ToolError::Permanent(format!("create docs dir: {}", e)))?;
        let path = self.docs_dir.join(format!("{}.md", slugify(title)));
        std::fs::write(&path, &doc)
            .map_err(|e| ToolError::Permanent(format!("write {}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), "doc_write rendered document");
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Launch Plan: Q3!"), "launch-plan-q3");
        assert_eq!(slugify("  "), "document");
    }

    #[test]
    fn test_scrub_placeholders() {
        let text = "Real line\n[Insert metric here]\nAnother real line";
        let out = scrub_placeholders(text);
        assert!(out.contains("Real line"));
        assert!(!out.to_lowercase().contains("[insert"));
    }

    #[test]
    fn test_full_doc_not_rewrapped() {
        let doc = "# T\n\n## A\nx\n\n## B\ny";
        assert!(looks_like_full_doc(doc));
        assert_eq!(render("T", doc, ""), doc);
    }

    #[tokio::test]
    async fn test_invoke_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DocWriteTool::new(dir.path());
        let out = tool
            .invoke(serde_json::json!({
                "title": "Weather Summary",
                "content": "- sunny\n- 22C",
                "goal": "summarize the weather"
            }))
            .await
            .unwrap();
        assert!(out.contains("# Weather Summary"));
        assert!(dir.path().join("docs/weather-summary.md").exists());
    }

    #[tokio::test]
    async fn test_missing_title_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DocWriteTool::new(dir.path());
        let err = tool
            .invoke(serde_json::json!({"content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
