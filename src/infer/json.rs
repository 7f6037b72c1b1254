//! 模型输出 JSON 提取
//!
//! 模型常把 JSON 包在 ```json 围栏或说明文字里；这里提取第一个 JSON 对象/数组并解析，
//! 解析失败时截到最后一个闭括号重试一次。

/// 去除 ```json ... ``` / ``` ... ``` 围栏
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // 跳过语言标记行（如 json）
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 从文本中提取第一个 JSON 值并解析
pub fn extract_json(text: &str) -> Result<serde_json::Value, String> {
    let candidate = strip_code_fences(text);

    let start_obj = candidate.find('{');
    let start_arr = candidate.find('[');
    let start = match (start_obj, start_arr) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return Err("No JSON object/array found in text".to_string()),
    };
    let candidate = candidate[start..].trim();

    match serde_json::from_str(candidate) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            // 尾部可能有解释性文字，截到最后一个闭括号再试
            let last = candidate.rfind('}').max(candidate.rfind(']'));
            if let Some(end) = last {
                if let Ok(v) = serde_json::from_str(&candidate[..=end]) {
                    return Ok(v);
                }
            }
            Err(format!("JSON parse failed: {}", first_err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = extract_json(r#"{"steps": []}"#).unwrap();
        assert!(v["steps"].is_array());
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here is the plan:\n```json\n{\"steps\": [{\"description\": \"x\"}]}\n```";
        let v = extract_json(text).unwrap();
        assert_eq!(v["steps"][0]["description"], "x");
    }

    #[test]
    fn test_trailing_garbage() {
        let text = r#"{"a": 1} and that is the plan."#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_leading_prose() {
        let text = r#"Sure! {"a": [1, 2]}"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["a"][1], 2);
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json("no structured output here").is_err());
    }
}
