use crate::domain::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per tree, keyed by the tree's root.
///
/// Serializes in-process writers on the same tree; SQLite's write lock
/// covers writers in other processes.
#[derive(Debug, Clone, Default)]
pub struct ChainLocks {
    locks: Arc<Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, root: &NodeId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(root.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_root_is_exclusive() {
        let locks = ChainLocks::new();
        let root = NodeId::new("root");
        let guard = locks.acquire(&root).await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&root)).await;
        assert!(waiting.is_err());

        drop(guard);
        let _again = locks.acquire(&root).await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_roots_do_not_block() {
        let locks = ChainLocks::new();
        let _a = locks.acquire(&NodeId::new("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&NodeId::new("b"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
