//! 记忆层：Turn 日志（短期窗口 + 长期剪枝）、持久化、后台维护

pub mod maintenance;
pub mod persistence;
pub mod store;
pub mod turn;

pub use maintenance::spawn_pruner;
pub use persistence::{PersistenceError, SqliteTurnLog, TurnLog};
pub use store::{AppendOutcome, MemoryStore, PruneOutcome};
pub use turn::{Role, Turn, TurnDraft};
