//! # Distributed Read/Write Lock
//!
//! A local readers/writer lock in front of the [`DistributedLock`]:
//!
//! - **Readers** only take the local lock. Many at once, none while a writer
//!   holds or waits for it.
//! - **Writers** take the local lock exclusively, then the distributed lock.
//!   Release goes the other way around: distributed first, then local.
//!
//! Both acquisitions return guards. A read guard releases on drop; a write
//! guard should be given back with [`DistributedWriteGuard::release`] so that
//! the token handoff can be awaited and its errors seen.

use log::warn;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::distributed::DistributedLock;
use crate::common::error::Result;

#[derive(Clone)]
pub struct DistributedRwLock {
    local: Arc<RwLock<()>>,
    lock: DistributedLock,
}

impl DistributedRwLock {
    pub fn new(lock: DistributedLock) -> Self {
        Self {
            local: Arc::new(RwLock::new(())),
            lock,
        }
    }

    pub fn distributed(&self) -> &DistributedLock {
        &self.lock
    }

    /// Shared access; never touches the distributed lock.
    pub async fn read_acquire(&self) -> OwnedRwLockReadGuard<()> {
        self.local.clone().read_owned().await
    }

    /// Exclusive access, locally and across all peers.
    pub async fn write_acquire(&self) -> Result<DistributedWriteGuard> {
        let local = self.local.clone().write_owned().await;
        // On failure `local` is dropped here, so local writers are not blocked.
        self.lock.acquire().await?;
        Ok(DistributedWriteGuard {
            local: Some(local),
            lock: self.lock.clone(),
        })
    }
}

/// Held write access. Give it back with [`DistributedWriteGuard::release`].
pub struct DistributedWriteGuard {
    local: Option<OwnedRwLockWriteGuard<()>>,
    lock: DistributedLock,
}

impl DistributedWriteGuard {
    /// Release the distributed lock, then local exclusivity.
    pub async fn release(mut self) -> Result<()> {
        let released = self.lock.release().await;
        self.local.take();
        released
    }
}

impl Drop for DistributedWriteGuard {
    fn drop(&mut self) {
        let Some(local) = self.local.take() else {
            return;
        };
        let lock = self.lock.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = lock.release().await {
                        warn!("⚠️  Releasing a dropped write guard failed: {}", e);
                    }
                    drop(local);
                });
            }
            Err(_) => warn!("⚠️  Write guard dropped outside a runtime; distributed lock kept"),
        }
    }
}
