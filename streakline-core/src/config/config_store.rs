//! Shared config store with change notification.
//!
//! `ConfigStore<T>` holds the live value behind `Arc<RwLock<T>>`; a watch
//! channel carries a version counter so consumers can `await` the next
//! change instead of polling.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

/// A shared configuration value that can be swapped at runtime.
pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Waits for updates to a [`ConfigStore`].
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    pub async fn update(&self, value: T) {
        {
            let mut guard = self.inner.data.write().await;
            *guard = value;
            // Write guard is released before notifying so a woken watcher
            // can read immediately.
        }
        self.inner.version_tx.send_modify(|version| *version += 1);
    }

    /// Read the current value.
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait until the store is updated. `Err` means the store was dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_sees_an_update() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();
        store.update(2).await;
        assert!(watcher.changed().await.is_ok());
        assert_eq!(*store.read().await, 2);
    }
}
