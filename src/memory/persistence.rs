//! Turn 日志持久化
//!
//! TurnLog 是存储引擎的最小契约：追加、按 id 读最近 N 条、按时间删除（保护短期窗口）。
//! SqliteTurnLog 为默认实现（rusqlite，同步；单连接由 Mutex 串行化）。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::memory::{Role, Turn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt turn row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("turn log lock poisoned")]
    Poisoned,
}

/// 持久化 Turn 日志：以严格递增的 id 为键，只追加
pub trait TurnLog: Send + Sync {
    fn append(&self, turn: &Turn) -> Result<(), PersistenceError>;

    /// 最近 limit 条，按 id 升序
    fn recent(&self, limit: usize) -> Result<Vec<Turn>, PersistenceError>;

    /// 删除 timestamp < cutoff 且 id < protected_from_id 的记录，返回删除条数
    fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        protected_from_id: u64,
    ) -> Result<usize, PersistenceError>;

    fn max_id(&self) -> Result<Option<u64>, PersistenceError>;
}

/// 定长时间格式，保证 TEXT 列按字典序比较即按时间比较
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteTurnLog {
    conn: Mutex<Connection>,
}

impl SqliteTurnLog {
    /// 打开（必要时创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                intent TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_turns_timestamp ON turns(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        f(&conn)
    }
}

impl TurnLog for SqliteTurnLog {
    fn append(&self, turn: &Turn) -> Result<(), PersistenceError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turns (id, role, text, timestamp, intent) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    turn.id as i64,
                    turn.role.as_str(),
                    turn.text,
                    encode_timestamp(&turn.timestamp),
                    turn.intent,
                ],
            )?;
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<Turn>, PersistenceError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, text, timestamp, intent FROM turns ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut turns = rows
            .into_iter()
            .map(|(id, role, text, timestamp, intent)| {
                let role = role
                    .parse::<Role>()
                    .map_err(|reason| PersistenceError::Corrupt { id, reason })?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| PersistenceError::Corrupt {
                        id,
                        reason: e.to_string(),
                    })?
                    .with_timezone(&Utc);
                Ok(Turn {
                    id: id as u64,
                    role,
                    text,
                    timestamp,
                    intent,
                })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;
        turns.reverse();
        Ok(turns)
    }

    fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        protected_from_id: u64,
    ) -> Result<usize, PersistenceError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM turns WHERE timestamp < ?1 AND id < ?2",
                params![encode_timestamp(&cutoff), protected_from_id as i64],
            )?;
            Ok(n)
        })
    }

    fn max_id(&self) -> Result<Option<u64>, PersistenceError> {
        self.with_conn(|conn| {
            let max: Option<i64> = conn
                .query_row("SELECT MAX(id) FROM turns", [], |row| row.get(0))
                .optional()?
                .flatten();
            Ok(max.map(|id| id as u64))
        })
    }
}
