//! 反馈日志
//!
//! 仅追加：任务结束后由调用方打分 + 评论，多条对一个任务。
//! 评分范围由配置给定（默认 1..=5），越界返回 InvalidFeedback。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::core::{FeedbackError, StoreError};
use crate::store::db;

/// 反馈条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub task_id: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// 反馈日志存储
pub struct FeedbackLog {
    conn: Mutex<Connection>,
    min_rating: i64,
    max_rating: i64,
}

impl FeedbackLog {
    pub fn open(path: &Path, min_rating: i64, max_rating: i64) -> Result<Self, StoreError> {
        Self::init(db::open_db(path)?, min_rating, max_rating)
    }

    /// 内存库（测试用）
    pub fn open_in_memory(min_rating: i64, max_rating: i64) -> Result<Self, StoreError> {
        Self::init(db::open_in_memory()?, min_rating, max_rating)
    }

    fn init(conn: Connection, min_rating: i64, max_rating: i64) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS feedback_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_feedback_task ON feedback_entries(task_id)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            min_rating,
            max_rating,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("feedback store mutex poisoned")
    }

    /// 记录一条反馈；评分越界返回 InvalidFeedback
    pub fn record(
        &self,
        task_id: &str,
        rating: i64,
        comment: &str,
    ) -> Result<FeedbackEntry, FeedbackError> {
        if rating < self.min_rating || rating > self.max_rating {
            return Err(FeedbackError::InvalidFeedback {
                rating,
                min: self.min_rating,
                max: self.max_rating,
            });
        }
        let entry = FeedbackEntry {
            task_id: task_id.to_string(),
            rating,
            comment: comment.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO feedback_entries (task_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                entry.task_id,
                entry.rating,
                entry.comment,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(entry)
    }

    /// 按时间顺序读取一个任务的全部反馈
    pub fn read_all(&self, task_id: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task_id, rating, comment, created_at
             FROM feedback_entries WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            Ok(FeedbackEntry {
                task_id: row.get(0)?,
                rating: row.get(1)?,
                comment: row.get(2)?,
                created_at: row
                    .get::<_, String>(3)?
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
