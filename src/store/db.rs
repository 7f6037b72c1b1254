//! SQLite 连接辅助
//!
//! 每个存储各开一个库文件；WAL + synchronous=FULL，保证 put/append 返回即落盘。

use std::path::Path;

use rusqlite::Connection;

use crate::core::StoreError;

/// 打开（或创建）一个库文件，父目录不存在时自动创建
pub fn open_db(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    Ok(conn)
}

/// 内存库（测试用）
pub fn open_in_memory() -> Result<Connection, StoreError> {
    Ok(Connection::open_in_memory()?)
}
