//! 持久化层
//!
//! 三个相互独立的 SQLite 库：memory.db（记忆 + 偏好）、trace.db（决策轨迹）、
//! feedback.db（反馈）。各库内部串行（连接互斥锁），写入在调用返回前落盘；
//! 库之间不做跨库事务（最终一致即可）。

pub mod db;
pub mod feedback;
pub mod memory;
pub mod trace;

pub use feedback::{FeedbackEntry, FeedbackLog};
pub use memory::{MemoryRecord, MemoryStore, Preference, PreferenceWrite, SetBy};
pub use trace::{DecisionTrace, DecisionTraceEntry, TraceKind};
