use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Per-(bot, symbol) async mutual exclusion.
///
/// Two webhook deliveries arriving close together would otherwise race a
/// find-open / mutate / persist sequence on the same position key. Every
/// strategy dispatch and every sweep close acquires the key's lock first.
/// The map only grows with distinct keys, which is bounded by
/// bots x symbols.
#[derive(Default)]
pub struct PositionLocks {
    locks: RwLock<HashMap<(String, String), Arc<Mutex<()>>>>,
}

/// Held for the duration of one guarded position operation.
pub struct PositionLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PositionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, bot_name: &str, symbol: &str) -> PositionLockGuard {
        let key = (bot_name.to_string(), symbol.to_string());
        let lock = {
            let mut locks = self.locks.write().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        PositionLockGuard {
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn serializes_same_key() {
        let locks = Arc::new(PositionLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("bot1", "BTCUSDT").await;
                // nobody else may be inside the section while we hold the lock
                assert_eq!(counter.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                assert_eq!(counter.fetch_sub(1, Ordering::SeqCst), 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = PositionLocks::new();
        let _first = locks.acquire("bot1", "BTCUSDT").await;
        // a different symbol must not deadlock behind the held guard
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.acquire("bot1", "ETHUSDT"),
        )
        .await;
        assert!(second.is_ok());
    }
}
