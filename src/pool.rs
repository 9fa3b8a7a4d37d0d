//! Bounded SQLite connection pool.
//!
//! Lookup traffic shares a fixed set of reader connections. A caller borrows
//! one with [`ConnectionPool::acquire`] and gets a [`PooledConnection`] guard
//! that returns the connection on every exit path, including panics and
//! early `?` returns. Acquire exhaustion is a value ([`VaultError::PoolExhausted`]),
//! never a crash: it signals backpressure and callers may retry.
//!
//! The pool is one of only two structures in the crate mutated from multiple
//! tasks (the other is the progress store). It uses a single mutex over the
//! idle list, never held across an await, and a `Notify` for waiters, so
//! there is no lock ordering to get wrong.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tokio::sync::Notify;

use crate::db;
use crate::error::{Result, VaultError};

#[derive(Debug)]
struct PoolInner {
    idle: VecDeque<SqliteConnection>,
    initialized: bool,
}

#[derive(Debug)]
struct PoolShared {
    inner: Mutex<PoolInner>,
    notify: Notify,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded, thread-safe pool of reusable SQLite reader sessions.
pub struct ConnectionPool {
    db_path: PathBuf,
    size: usize,
    shared: Arc<PoolShared>,
    init_lock: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    /// Creates an empty (uninitialized) pool. [`initialize`] must run before
    /// the first [`acquire`].
    ///
    /// [`initialize`]: ConnectionPool::initialize
    /// [`acquire`]: ConnectionPool::acquire
    pub fn new(db_path: PathBuf, size: usize) -> Self {
        Self {
            db_path,
            size,
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    idle: VecDeque::new(),
                    initialized: false,
                }),
                notify: Notify::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Opens exactly `size` connections and makes them available.
    ///
    /// Idempotent: a second call while initialized is a no-op. Stray
    /// connections returned after a [`close_all`] are discarded here when
    /// the fresh set is installed.
    ///
    /// [`close_all`]: ConnectionPool::close_all
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.shared.lock().initialized {
            return Ok(());
        }

        let mut conns = VecDeque::with_capacity(self.size);
        for _ in 0..self.size {
            conns.push_back(db::open_reader(&self.db_path).await?);
        }

        let mut inner = self.shared.lock();
        inner.idle = conns;
        inner.initialized = true;
        Ok(())
    }

    /// Borrows a connection, waiting up to `timeout` for one to be released.
    ///
    /// Returns [`VaultError::PoolExhausted`] when the timeout elapses and
    /// [`VaultError::PoolClosed`] immediately when the pool is not
    /// initialized.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = {
                let mut inner = self.shared.lock();
                if !inner.initialized {
                    return Err(VaultError::PoolClosed);
                }
                if let Some(conn) = inner.idle.pop_front() {
                    return Ok(PooledConnection {
                        conn: Some(conn),
                        shared: Arc::clone(&self.shared),
                    });
                }
                // Created while the idle list is known-empty; any release
                // after this point wakes it.
                self.shared.notify.notified()
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(VaultError::PoolExhausted(timeout));
            }
        }
    }

    /// Drains and closes every idle connection. Subsequent [`acquire`] calls
    /// fail fast with [`VaultError::PoolClosed`] until [`initialize`] runs
    /// again.
    ///
    /// [`acquire`]: ConnectionPool::acquire
    /// [`initialize`]: ConnectionPool::initialize
    pub async fn close_all(&self) {
        let _guard = self.init_lock.lock().await;
        let conns = {
            let mut inner = self.shared.lock();
            inner.initialized = false;
            std::mem::take(&mut inner.idle)
        };
        for conn in conns {
            let _ = conn.close().await;
        }
        // Wake blocked acquirers so they observe the closed state.
        self.shared.notify.notify_waiters();
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }
}

/// RAII guard over a borrowed connection.
///
/// Dereferences to [`SqliteConnection`]; dropping it returns the connection
/// to the pool unconditionally — the pool does not validate health on
/// return, matching the source behavior.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    shared: Arc<PoolShared>,
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut inner = self.shared.lock();
            inner.idle.push_back(conn);
            drop(inner);
            self.shared.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_pool(size: usize) -> (TempDir, ConnectionPool) {
        let tmp = TempDir::new().unwrap();
        let pool = ConnectionPool::new(tmp.path().join("pool.sqlite"), size);
        (tmp, pool)
    }

    #[tokio::test]
    async fn acquire_before_initialize_fails_fast() {
        let (_tmp, pool) = test_pool(2);
        let err = pool.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, VaultError::PoolClosed));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (_tmp, pool) = test_pool(2);
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        // Exactly two connections exist: a third acquire must time out.
        let a = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, VaultError::PoolExhausted(_)));
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_quickly_as_a_value() {
        // Scenario: all connections checked out, 10ms timeout.
        let (_tmp, pool) = test_pool(1);
        pool.initialize().await.unwrap();
        let held = pool.acquire(Duration::from_millis(100)).await.unwrap();

        let start = std::time::Instant::now();
        let err = pool.acquire(Duration::from_millis(10)).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, VaultError::PoolExhausted(_)));
        assert!(
            elapsed < Duration::from_millis(500),
            "timeout took {:?}",
            elapsed
        );
        drop(held);
    }

    #[tokio::test]
    async fn release_unblocks_a_waiter() {
        let (_tmp, pool) = test_pool(1);
        pool.initialize().await.unwrap();
        let held = pool.acquire(Duration::from_millis(100)).await.unwrap();

        let pool = Arc::new(pool);
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(
                async move { pool.acquire(Duration::from_secs(2)).await.is_ok() },
            )
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        assert!(waiter.await.unwrap(), "waiter was not woken by release");
    }

    #[tokio::test]
    async fn close_all_then_acquire_fails_until_reinitialized() {
        let (_tmp, pool) = test_pool(2);
        pool.initialize().await.unwrap();
        pool.close_all().await;

        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, VaultError::PoolClosed));

        pool.initialize().await.unwrap();
        let conn = pool.acquire(Duration::from_millis(100)).await;
        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn guard_returns_connection_on_drop() {
        let (_tmp, pool) = test_pool(1);
        pool.initialize().await.unwrap();
        for _ in 0..5 {
            let conn = pool.acquire(Duration::from_millis(100)).await.unwrap();
            drop(conn);
        }
        // Still exactly one connection cycling through.
        let held = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, VaultError::PoolExhausted(_)));
        drop(held);
    }
}
