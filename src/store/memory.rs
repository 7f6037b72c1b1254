//! 记忆存储
//!
//! 两类条目：记忆记录（跨任务的事实，namespace+key 唯一，last-write-wins）与
//! 偏好（带来源标记 user/inferred）。不变式：inferred 写入不得覆盖已存在的 user 条目，
//! 该调用为静默 no-op，由调用方按需写入决策轨迹。写入在返回前落盘；不做隐式删除，
//! 仅提供显式的 clear_namespace。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::store::db;

/// 偏好来源：用户显式设置 / 系统推断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetBy {
    User,
    Inferred,
}

impl SetBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetBy::User => "user",
            SetBy::Inferred => "inferred",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "user" => SetBy::User,
            _ => SetBy::Inferred,
        }
    }
}

/// 偏好写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceWrite {
    Applied,
    /// inferred 写入撞上已有 user 条目，被静默拒绝
    RejectedUserAuthority,
}

/// 记忆记录：跨任务的事实
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub source_task_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 偏好条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub set_by: SetBy,
    pub updated_at: DateTime<Utc>,
}

/// 记忆存储：records + preferences 两张表
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(db::open_db(path)?)
    }

    /// 内存库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(db::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_records (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                source_task_id TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                set_by TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("memory store mutex poisoned")
    }

    /// 读取记忆记录值
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM memory_records WHERE namespace = ?1 AND key = ?2",
                [namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入记忆记录（同 key 覆盖，last-write-wins；返回前已落盘）
    pub fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        source_task_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO memory_records (namespace, key, value, source_task_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![namespace, key, value, source_task_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// 命名空间内全部记忆记录快照（按 key 排序）
    pub fn snapshot(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT namespace, key, value, source_task_id, updated_at
             FROM memory_records WHERE namespace = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([namespace], |row| {
            Ok(MemoryRecord {
                namespace: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
                source_task_id: row.get(3)?,
                updated_at: parse_ts(row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// 读取偏好
    pub fn get_preference(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Preference>, StoreError> {
        let conn = self.conn();
        let pref = conn
            .query_row(
                "SELECT namespace, key, value, set_by, updated_at
                 FROM preferences WHERE namespace = ?1 AND key = ?2",
                [namespace, key],
                |row| {
                    Ok(Preference {
                        namespace: row.get(0)?,
                        key: row.get(1)?,
                        value: row.get(2)?,
                        set_by: SetBy::from_str(&row.get::<_, String>(3)?),
                        updated_at: parse_ts(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(pref)
    }

    /// 写入偏好。inferred 不得覆盖 user：检查与写入在同一事务内完成
    pub fn set_preference(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        set_by: SetBy,
    ) -> Result<PreferenceWrite, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT set_by FROM preferences WHERE namespace = ?1 AND key = ?2",
                [namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        if set_by == SetBy::Inferred && existing.as_deref() == Some("user") {
            tx.commit()?;
            tracing::debug!(
                namespace = %namespace,
                key = %key,
                "inferred preference write rejected (user authority)"
            );
            return Ok(PreferenceWrite::RejectedUserAuthority);
        }

        tx.execute(
            "INSERT OR REPLACE INTO preferences (namespace, key, value, set_by, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                namespace,
                key,
                value,
                set_by.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(PreferenceWrite::Applied)
    }

    /// 命名空间内全部偏好快照（按 key 排序）
    pub fn preferences_snapshot(&self, namespace: &str) -> Result<Vec<Preference>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT namespace, key, value, set_by, updated_at
             FROM preferences WHERE namespace = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([namespace], |row| {
            Ok(Preference {
                namespace: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
                set_by: SetBy::from_str(&row.get::<_, String>(3)?),
                updated_at: parse_ts(row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// 显式清空一个命名空间（记录与偏好都删）
    pub fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute("DELETE FROM memory_records WHERE namespace = ?1", [namespace])?;
        conn.execute("DELETE FROM preferences WHERE namespace = ?1", [namespace])?;
        Ok(())
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_last_write_wins() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.put("default", "city", "Berlin", Some("task_1")).unwrap();
        store.put("default", "city", "Lisbon", Some("task_2")).unwrap();
        assert_eq!(store.get("default", "city").unwrap().as_deref(), Some("Lisbon"));
        assert_eq!(store.get("other", "city").unwrap(), None);
    }

    #[test]
    fn test_get_preference_idempotent() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .set_preference("default", "tone", "formal", SetBy::User)
            .unwrap();
        let first = store.get_preference("default", "tone").unwrap().unwrap();
        let second = store.get_preference("default", "tone").unwrap().unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.set_by, second.set_by);
    }

    #[test]
    fn test_user_preference_not_overwritten_by_inferred() {
        let store = MemoryStore::open_in_memory().unwrap();
        assert_eq!(
            store
                .set_preference("default", "lang", "en", SetBy::User)
                .unwrap(),
            PreferenceWrite::Applied
        );
        assert_eq!(
            store
                .set_preference("default", "lang", "de", SetBy::Inferred)
                .unwrap(),
            PreferenceWrite::RejectedUserAuthority
        );
        let pref = store.get_preference("default", "lang").unwrap().unwrap();
        assert_eq!(pref.value, "en");
        assert_eq!(pref.set_by, SetBy::User);
    }

    #[test]
    fn test_inferred_then_user_overwrites() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .set_preference("default", "units", "metric", SetBy::Inferred)
            .unwrap();
        // user 覆盖 inferred 允许
        assert_eq!(
            store
                .set_preference("default", "units", "imperial", SetBy::User)
                .unwrap(),
            PreferenceWrite::Applied
        );
        // inferred 覆盖 inferred 也允许
        let store2 = MemoryStore::open_in_memory().unwrap();
        store2
            .set_preference("default", "units", "metric", SetBy::Inferred)
            .unwrap();
        assert_eq!(
            store2
                .set_preference("default", "units", "imperial", SetBy::Inferred)
                .unwrap(),
            PreferenceWrite::Applied
        );
    }

    #[test]
    fn test_clear_namespace() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.put("default", "a", "1", None).unwrap();
        store
            .set_preference("default", "b", "2", SetBy::User)
            .unwrap();
        store.clear_namespace("default").unwrap();
        assert!(store.snapshot("default").unwrap().is_empty());
        assert!(store.preferences_snapshot("default").unwrap().is_empty());
    }
}
