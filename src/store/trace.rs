//! 决策轨迹
//!
//! 仅追加的审计日志：每个任务的 sequence_no 从 1 起连续递增（事务内取 MAX+1 再插入，
//! 连接互斥锁保证同任务写入串行）。模块不提供任何更新 / 删除操作——审计轨迹按构造不可变。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::store::db;

/// 轨迹条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    PlanCreated,
    StepStarted,
    StepFinished,
    StepFailed,
    Replan,
    /// 规划失败（任务因 PlanningError 终止前记录真实原因）
    PlanFailed,
    /// inferred 偏好写入因用户权威被拒绝
    PreferenceRejected,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::PlanCreated => "plan_created",
            TraceKind::StepStarted => "step_started",
            TraceKind::StepFinished => "step_finished",
            TraceKind::StepFailed => "step_failed",
            TraceKind::Replan => "replan",
            TraceKind::PlanFailed => "plan_failed",
            TraceKind::PreferenceRejected => "preference_rejected",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "plan_created" => Some(TraceKind::PlanCreated),
            "step_started" => Some(TraceKind::StepStarted),
            "step_finished" => Some(TraceKind::StepFinished),
            "step_failed" => Some(TraceKind::StepFailed),
            "replan" => Some(TraceKind::Replan),
            "plan_failed" => Some(TraceKind::PlanFailed),
            "preference_rejected" => Some(TraceKind::PreferenceRejected),
            _ => None,
        }
    }
}

/// 轨迹条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTraceEntry {
    pub task_id: String,
    pub sequence_no: i64,
    pub kind: TraceKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// 决策轨迹存储
pub struct DecisionTrace {
    conn: Mutex<Connection>,
}

impl DecisionTrace {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(db::open_db(path)?)
    }

    /// 内存库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(db::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trace_entries (
                task_id TEXT NOT NULL,
                sequence_no INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (task_id, sequence_no)
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("trace store mutex poisoned")
    }

    /// 追加一条轨迹，返回分配的 sequence_no（同任务内连续且无空洞）
    pub fn append(
        &self,
        task_id: &str,
        kind: TraceKind,
        payload: serde_json::Value,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_no), 0) + 1 FROM trace_entries WHERE task_id = ?1",
            [task_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO trace_entries (task_id, sequence_no, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                task_id,
                next,
                kind.as_str(),
                payload.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        tracing::debug!(task_id = %task_id, seq = next, kind = %kind.as_str(), "trace append");
        Ok(next)
    }

    /// 按 sequence_no 顺序读取一个任务的全部轨迹
    pub fn read_all(&self, task_id: &str) -> Result<Vec<DecisionTraceEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task_id, sequence_no, kind, payload, created_at
             FROM trace_entries WHERE task_id = ?1 ORDER BY sequence_no",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (task_id, sequence_no, kind, payload, created_at) = row?;
            entries.push(DecisionTraceEntry {
                task_id,
                sequence_no,
                kind: TraceKind::from_str(&kind).unwrap_or(TraceKind::StepFailed),
                payload: serde_json::from_str(&payload)?,
                created_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(entries)
    }
}
