//! Capped pool of store clients with scoped checkout.
//!
//! [`ClientPool::acquire`] hands out a [`PooledClient`] guard; dropping the
//! guard returns the client on every exit path, success or failure. Acquire
//! waits at most the configured timeout before failing with
//! [`ValetError::PoolExhausted`], which the pipeline treats as a transient
//! per-file error.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, ValetError};
use crate::remote::StoreClient;

/// Default time to wait for a free client.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<dyn StoreClient>>>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl ClientPool {
    pub fn new(clients: Vec<Arc<dyn StoreClient>>, acquire_timeout: Duration) -> Self {
        let capacity = clients.len();
        ClientPool {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(clients),
                capacity,
                acquire_timeout,
            }),
        }
    }

    /// Build a pool of `capacity` clients from a constructor closure.
    pub fn with_capacity<F>(capacity: usize, mut make: F, acquire_timeout: Duration) -> Self
    where
        F: FnMut() -> Arc<dyn StoreClient>,
    {
        ClientPool::new((0..capacity.max(1)).map(|_| make()).collect(), acquire_timeout)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Check a client out, waiting up to the acquire timeout.
    pub async fn acquire(&self) -> Result<PooledClient> {
        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            Arc::clone(&self.inner.slots).acquire_owned(),
        )
        .await
        .map_err(|_| ValetError::PoolExhausted)?
        .map_err(|_| ValetError::Store("client pool closed".to_string()))?;

        let client = self
            .inner
            .idle
            .lock()
            .unwrap()
            .pop()
            .expect("pool invariant: a permit guarantees an idle client");

        Ok(PooledClient { client: Some(client), pool: Arc::clone(&self.inner), _permit: permit })
    }
}

/// RAII guard over a checked-out client.
pub struct PooledClient {
    client: Option<Arc<dyn StoreClient>>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient").finish_non_exhaustive()
    }
}

impl Deref for PooledClient {
    type Target = dyn StoreClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_deref().expect("client present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Return the client before the permit is released.
            self.pool.idle.lock().unwrap().push(client);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::FsObjectStore;

    fn small_pool(capacity: usize, timeout: Duration) -> (tempfile::TempDir, ClientPool) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let pool = ClientPool::with_capacity(
            capacity,
            || Arc::new(FsObjectStore::new(root.clone())) as Arc<dyn StoreClient>,
            timeout,
        );
        (dir, pool)
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let (_dir, pool) = small_pool(1, Duration::from_millis(100));
        {
            let _client = pool.acquire().await.unwrap();
            // Second acquire must time out while the first is held.
            let err = pool.acquire().await.unwrap_err();
            assert!(matches!(err, ValetError::PoolExhausted));
        }
        // Guard dropped: the client is available again.
        let _client = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_bounded() {
        let (_dir, pool) = small_pool(2, Duration::from_millis(50));
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await.unwrap_err(), ValetError::PoolExhausted));
        drop(a);
        let _c = pool.acquire().await.unwrap();
        drop(b);
    }
}
