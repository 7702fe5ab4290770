//! 记忆存储：有界、有序的 Turn 日志
//!
//! 内存为权威副本，持久化为写穿（write-through）：持久化失败只作为告警返回，内存追加照常完成。
//! 读写由单个 RwLock 保护；剪枝在写锁内先确定短期窗口的起始 id，再删除，
//! 因此并发的 recent_window 不会看到缺了尾部的日志。
//! 日志 I/O 在释放锁之后进行：id 已在锁内分配，SQLite 按主键排序，写入先后不影响顺序。
//! 方法本身是同步阻塞的，异步调用方应放进 spawn_blocking。

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;

use crate::core::EngineError;
use crate::memory::{PersistenceError, Turn, TurnDraft, TurnLog};

/// append 的结果：已分配 id 的 Turn，以及可能的持久化告警
#[derive(Debug)]
pub struct AppendOutcome {
    pub turn: Turn,
    pub warning: Option<EngineError>,
}

/// prune 的结果：内存中删除的条数，以及可能的持久化告警
#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub removed: usize,
    pub warning: Option<EngineError>,
}

struct Inner {
    turns: VecDeque<Turn>,
    next_id: u64,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    log: Option<Arc<dyn TurnLog>>,
    short_term_limit: usize,
}

impl MemoryStore {
    /// 纯内存存储（无持久化）
    pub fn in_memory(short_term_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                turns: VecDeque::new(),
                next_id: 1,
            }),
            log: None,
            short_term_limit,
        }
    }

    /// 以持久化日志为后端打开：恢复最近 restore_limit 条，id 从日志最大 id 之后继续
    pub fn open(
        log: Arc<dyn TurnLog>,
        short_term_limit: usize,
        restore_limit: usize,
    ) -> Result<Self, PersistenceError> {
        let restored = log.recent(restore_limit.max(short_term_limit))?;
        let max_id = log.max_id()?.unwrap_or(0);
        tracing::info!(restored = restored.len(), max_id, "memory restored from turn log");
        Ok(Self {
            inner: RwLock::new(Inner {
                turns: restored.into(),
                next_id: max_id + 1,
            }),
            log: Some(log),
            short_term_limit,
        })
    }

    pub fn short_term_limit(&self) -> usize {
        self.short_term_limit
    }

    /// 锁中毒时仍取出数据继续：对话连续性优先
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 在写锁内分配下一个 id 并追加，释放锁后再写持久化日志
    pub fn append(&self, draft: TurnDraft) -> AppendOutcome {
        let turn = {
            let mut inner = self.write();
            let turn = draft.into_turn(inner.next_id);
            inner.next_id += 1;
            inner.turns.push_back(turn.clone());
            turn
        };

        let warning = self.log.as_ref().and_then(|log| {
            log.append(&turn).err().map(|e| {
                tracing::warn!(turn_id = turn.id, error = %e, "turn persisted to memory only");
                EngineError::from(e)
            })
        });
        tracing::debug!(turn_id = turn.id, role = %turn.role, "turn appended");
        AppendOutcome { turn, warning }
    }

    /// 最近 limit 条 Turn，最新的在最后
    pub fn recent_window(&self, limit: usize) -> Vec<Turn> {
        let inner = self.read();
        let skip = inner.turns.len().saturating_sub(limit);
        inner.turns.iter().skip(skip).cloned().collect()
    }

    /// 删除早于 now - older_than 的 Turn；当前短期窗口内的 Turn 无论多旧都保留。幂等。
    pub fn prune(&self, older_than: Duration) -> PruneOutcome {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return PruneOutcome::default();
        };

        let (removed, protected_from_id) = {
            let mut inner = self.write();
            let len = inner.turns.len();
            let protected_from_id = if self.short_term_limit == 0 {
                inner.next_id
            } else if len > self.short_term_limit {
                inner.turns[len - self.short_term_limit].id
            } else {
                inner.turns.front().map(|t| t.id).unwrap_or(inner.next_id)
            };
            inner
                .turns
                .retain(|t| t.id >= protected_from_id || t.timestamp >= cutoff);
            (len - inner.turns.len(), protected_from_id)
        };

        let warning = self.log.as_ref().and_then(|log| {
            log.delete_before(cutoff, protected_from_id)
                .map_err(|e| {
                    tracing::warn!(error = %e, "prune not applied to turn log");
                    EngineError::from(e)
                })
                .err()
        });
        if removed > 0 {
            tracing::info!(removed, protected_from_id, "pruned old turns");
        }
        PruneOutcome { removed, warning }
    }

    pub fn len(&self) -> usize {
        self.read().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Role, SqliteTurnLog};

    fn old_draft(text: &str, days: i64) -> TurnDraft {
        TurnDraft::user(text).at(Utc::now() - chrono::Duration::days(days))
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let store = MemoryStore::in_memory(4);
        let ids: Vec<u64> = (0..6)
            .map(|i| store.append(TurnDraft::user(format!("u{i}"))).turn.id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recent_window_returns_tail_in_order() {
        let store = MemoryStore::in_memory(10);
        for i in 0..5 {
            store.append(TurnDraft::user(format!("u{i}")));
        }
        let window = store.recent_window(3);
        let texts: Vec<&str> = window.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["u2", "u3", "u4"]);
        assert_eq!(store.recent_window(50).len(), 5);
        assert!(store.recent_window(0).is_empty());
    }

    #[test]
    fn test_prune_zero_keeps_short_term_window() {
        let store = MemoryStore::in_memory(3);
        for i in 0..5 {
            store.append(old_draft(&format!("old{i}"), 400));
        }
        let outcome = store.prune(Duration::ZERO);
        assert_eq!(outcome.removed, 2);
        let texts: Vec<String> = store.recent_window(10).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["old2", "old3", "old4"]);

        // 幂等
        assert_eq!(store.prune(Duration::ZERO).removed, 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_prune_keeps_recent_turns_outside_window() {
        let store = MemoryStore::in_memory(1);
        store.append(old_draft("ancient", 365));
        store.append(TurnDraft::user("fresh"));
        store.append(TurnDraft::assistant("fresh reply"));
        let outcome = store.prune(Duration::from_secs(24 * 3600));
        assert_eq!(outcome.removed, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_huge_horizon_prunes_nothing() {
        let store = MemoryStore::in_memory(1);
        store.append(old_draft("a", 10));
        store.append(old_draft("b", 10));
        assert_eq!(store.prune(Duration::MAX).removed, 0);
    }

    #[test]
    fn test_open_restores_and_continues_ids() {
        let log = Arc::new(SqliteTurnLog::open_in_memory().unwrap());
        {
            let store = MemoryStore::open(log.clone(), 5, 100).unwrap();
            store.append(TurnDraft::user("first"));
            store.append(TurnDraft::assistant("reply"));
        }
        let store = MemoryStore::open(log, 5, 100).unwrap();
        let window = store.recent_window(5);
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].role, Role::Assistant);
        let next = store.append(TurnDraft::user("again"));
        assert_eq!(next.turn.id, 3);
        assert!(next.warning.is_none());
    }

    /// append 阻塞 delay 的日志
    struct SlowLog {
        delay: Duration,
    }

    impl TurnLog for SlowLog {
        fn append(&self, _turn: &Turn) -> Result<(), PersistenceError> {
            std::thread::sleep(self.delay);
            Ok(())
        }

        fn recent(&self, _limit: usize) -> Result<Vec<Turn>, PersistenceError> {
            Ok(Vec::new())
        }

        fn delete_before(
            &self,
            _cutoff: chrono::DateTime<Utc>,
            _protected_from_id: u64,
        ) -> Result<usize, PersistenceError> {
            std::thread::sleep(self.delay);
            Ok(0)
        }

        fn max_id(&self) -> Result<Option<u64>, PersistenceError> {
            Ok(None)
        }
    }

    #[test]
    fn test_slow_log_does_not_block_readers() {
        let log = Arc::new(SlowLog {
            delay: Duration::from_millis(600),
        });
        let store = Arc::new(MemoryStore::open(log, 10, 10).unwrap());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.append(TurnDraft::user("hello")))
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let window = store.recent_window(10);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].text, "hello");

        let pruner = {
            let store = store.clone();
            std::thread::spawn(move || store.prune(Duration::ZERO))
        };
        std::thread::sleep(Duration::from_millis(100));
        let started = std::time::Instant::now();
        assert_eq!(store.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(300));

        assert_eq!(writer.join().unwrap().turn.id, 1);
        pruner.join().unwrap();
    }

    #[test]
    fn test_prune_propagates_to_log() {
        let log = Arc::new(SqliteTurnLog::open_in_memory().unwrap());
        let store = MemoryStore::open(log.clone(), 2, 100).unwrap();
        for i in 0..4 {
            store.append(old_draft(&format!("t{i}"), 30));
        }
        let outcome = store.prune(Duration::from_secs(3600));
        assert_eq!(outcome.removed, 2);
        assert!(outcome.warning.is_none());
        let ids: Vec<u64> = log.recent(10).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
