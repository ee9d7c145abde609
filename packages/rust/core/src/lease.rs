//! Per-record single-flight leases.

use std::time::Duration;

use async_trait::async_trait;

use intakesync_shared::Result;
use intakesync_storage::Storage;

/// A store that can hand out short-lived exclusive leases on string keys.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take or renew the lease. `false` means another live owner holds it.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Extend a lease `owner` has held without interruption. `false` means it
    /// was released or taken over in the meantime.
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    async fn release(&self, key: &str, owner: &str) -> Result<()>;
}

#[async_trait]
impl LeaseStore for Storage {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.try_acquire_lease(key, owner, ttl).await
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.renew_lease(key, owner, ttl).await
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        self.release_lease(key, owner).await
    }
}

/// Lease key for one record in one database.
pub fn record_key(database_id: &str, id: u32) -> String {
    format!("{database_id}:{id}")
}
