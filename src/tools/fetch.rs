//! fetch 工具：HTTP GET，域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名；HTML 响应用 html2text 提取可读文本；
//! 超长结果截断并追加 ...[truncated]。
//! 错误分类：429/5xx/网络超时 → Transient，其余 HTTP 错误 → Permanent，
//! 非白名单域名或缺 url → InvalidInput。

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Tool;

/// fetch 工具：抓取 URL 内容
pub struct FetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 从 URL 中提取 host（小写，不含端口与路径）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split('/').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!") || s.starts_with("<html") || s.starts_with("<HTML")
}

impl FetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("porter/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    fn check_allowed(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::InvalidInput("invalid or missing URL".to_string()))?;
        if self.allowed_domains.contains(&domain) {
            Ok(())
        } else {
            Err(ToolError::InvalidInput(format!(
                "domain not in allowlist: {}",
                domain
            )))
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        self.check_allowed(url)?;

        let resp = self.client.get(url).send().await.map_err(|e| {
            // 网络层错误（连接失败、超时）视为瞬时
            ToolError::Transient(format!("request failed: {}", e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let msg = format!("HTTP {}", status);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ToolError::Transient(msg))
            } else {
                Err(ToolError::Permanent(msg))
            };
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Transient(format!("read body: {}", e)))?;
        let body = body.strip_prefix('\u{FEFF}').unwrap_or(&body).to_string();

        let body = if looks_like_html(&body) {
            match html2text::from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => body,
            }
        } else {
            body
        };

        let len = body.chars().count();
        if len > self.max_result_chars {
            Ok(body.chars().take(self.max_result_chars).collect::<String>()
                + "\n...[truncated]")
        } else {
            Ok(body)
        }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch URL content over HTTP GET (domain allowlist applies). Inputs: {\"url\": \"https://...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn invoke(&self, inputs: Value) -> Result<String, ToolError> {
        let url = inputs
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if url.is_empty() {
            return Err(ToolError::InvalidInput("missing url".to_string()));
        }
        tracing::info!(url = %url, "fetch tool request");
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://api.example.com/v1/weather?q=x"),
            Some("api.example.com".to_string())
        );
        assert_eq!(
            extract_domain("http://Example.COM:8080/path"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_domain("ftp://example.com"), None);
    }

    #[tokio::test]
    async fn test_disallowed_domain_invalid_input() {
        let tool = FetchTool::new(vec!["allowed.example".to_string()], 5, 1000);
        let err = tool
            .invoke(serde_json::json!({"url": "https://other.example/x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_url_invalid_input() {
        let tool = FetchTool::new(vec![], 5, 1000);
        let err = tool.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
