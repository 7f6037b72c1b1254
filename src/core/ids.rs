//! ID 生成
//!
//! 统一格式：`<前缀>_<uuid v4 前 16 位 hex>`，任务 / 计划 / 轨迹等实体共用。

use uuid::Uuid;

/// 生成带前缀的短 ID，如 `task_1f0a9c...`
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_format() {
        let id = new_id("task");
        assert!(id.starts_with("task_"));
        assert_eq!(id.len(), "task_".len() + 16);
    }

    #[test]
    fn test_new_id_unique() {
        assert_ne!(new_id("x"), new_id("x"));
    }
}
