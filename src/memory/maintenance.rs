//! 后台记忆维护：周期性剪枝
//!
//! 与分发并发运行，依赖 MemoryStore 自身的读写锁；每次剪枝放进阻塞线程池，CancellationToken 触发后退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::memory::MemoryStore;

/// 每隔 interval 对 store 执行一次 prune(horizon)，首次在一个 interval 之后
pub fn spawn_pruner(
    store: Arc<MemoryStore>,
    interval: Duration,
    horizon: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // interval 的第一次 tick 立即返回
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("pruner stopped");
                    break;
                }
                _ = ticker.tick() => {
                    // prune 会做同步 SQLite I/O，不占用异步工作线程
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.prune(horizon)).await {
                        Ok(outcome) => tracing::debug!(removed = outcome.removed, "periodic prune"),
                        Err(e) => tracing::warn!(error = %e, "periodic prune aborted"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TurnDraft;
    use chrono::Utc;

    #[tokio::test]
    async fn test_pruner_runs_and_stops() {
        let store = Arc::new(MemoryStore::in_memory(1));
        let old = Utc::now() - chrono::Duration::days(2);
        store.append(TurnDraft::user("old").at(old));
        store.append(TurnDraft::user("old too").at(old));

        let cancel = CancellationToken::new();
        let handle = spawn_pruner(
            store.clone(),
            Duration::from_millis(20),
            Duration::from_secs(3600),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.recent_window(1)[0].text, "old too");
    }
}
