//! TTL-based mutual exclusion for per-profile lifecycle operations.
//!
//! A lease is one row in a lock table: `{ LockID, Expires }`. Acquisition
//! is a single conditional write that succeeds only when the row is absent
//! or expired, which makes the lock self-healing after a crashed holder —
//! no reaper and no heartbeat renewal protocol; a lease is acquired once
//! and held for the duration of one operation.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::sleep;

use crate::poll::{PollError, PollPolicy, ProbeFuture, StatusProbe, wait_for_status};

/// Default lease lifetime. Must exceed the realistic duration of one
/// lifecycle critical section.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Lock-table status names reported by the store.
pub mod table_status {
    /// Table is ready to serve conditional writes.
    pub const ACTIVE: &str = "ACTIVE";
    /// Table is being deleted and will never become ready.
    pub const DELETING: &str = "DELETING";
}

/// Outcome of one conditional put against the lock table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    /// The entry was written; the caller now holds the lease.
    Acquired,
    /// A live entry already exists; the lease is held elsewhere.
    Held,
}

/// Future returned by lock store operations.
pub type StoreFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Storage backing the lease lock.
///
/// The store must guarantee that [`LockStore::put_if_absent_or_expired`] is
/// atomic: of any set of concurrent calls for one key, exactly one observes
/// [`PutOutcome::Acquired`] while the entry is absent or expired.
pub trait LockStore {
    /// Store specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name of the lock table, for diagnostics.
    fn table_name(&self) -> &str;

    /// Returns whether the lock table exists.
    fn table_exists(&self) -> StoreFuture<'_, bool, Self::Error>;

    /// Creates the lock table. Failing because the table already exists is
    /// a race the caller tolerates.
    fn create_table(&self) -> StoreFuture<'_, (), Self::Error>;

    /// Reads the lock table's current status.
    fn table_status(&self) -> StoreFuture<'_, String, Self::Error>;

    /// Writes `{lock_id, expires_at}` only when no entry exists or the
    /// existing entry expired before `now`.
    fn put_if_absent_or_expired<'a>(
        &'a self,
        lock_id: &'a str,
        expires_at: i64,
        now: i64,
    ) -> StoreFuture<'a, PutOutcome, Self::Error>;

    /// Deletes the entry unconditionally.
    fn delete<'a>(&'a self, lock_id: &'a str) -> StoreFuture<'a, (), Self::Error>;

    /// Reads the entry's expiry, when one exists.
    fn expires_at<'a>(&'a self, lock_id: &'a str) -> StoreFuture<'a, Option<i64>, Self::Error>;
}

/// Retry cadence for acquisition under contention.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AcquireRetry {
    /// Delay between acquisition attempts.
    pub interval: Duration,
    /// Overall budget before giving up with a timeout.
    pub budget: Duration,
}

impl Default for AcquireRetry {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            budget: Duration::from_secs(600),
        }
    }
}

/// Errors raised by lease lock operations.
#[derive(Debug, Error)]
pub enum LockError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised by a single acquisition attempt that lost to a live holder.
    #[error("lock {lock_id} is already held")]
    AlreadyHeld {
        /// Identifier of the contended lease.
        lock_id: String,
    },
    /// Raised when the retry budget elapses without acquisition.
    #[error("timed out acquiring lock {lock_id} after {waited_secs}s")]
    Timeout {
        /// Identifier of the contended lease.
        lock_id: String,
        /// Seconds spent retrying.
        waited_secs: u64,
    },
    /// Raised when a lock store call fails.
    #[error("lock store {operation} failed: {source}")]
    Store {
        /// Store operation that failed.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: E,
    },
    /// Raised when the lock table never becomes ready.
    #[error("lock table not ready: {0}")]
    Table(#[source] PollError<E>),
}

/// TTL-based lease lock over a [`LockStore`].
#[derive(Clone, Debug)]
pub struct LeaseLock<S: LockStore> {
    store: S,
    ttl: Duration,
    poll: PollPolicy,
}

impl<S: LockStore> LeaseLock<S> {
    /// Creates a lease lock with the default TTL.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            ttl: DEFAULT_LOCK_TTL,
            poll: PollPolicy::default(),
        }
    }

    /// Overrides the lease TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Overrides the polling policy used while waiting for table readiness.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Provisions the lock table when missing and waits until it is ready.
    ///
    /// Creation is check-then-create: when two callers race, the loser's
    /// create fails against the now-existing table and is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] when store calls fail and
    /// [`LockError::Table`] when the table never reaches `ACTIVE`.
    pub async fn ensure_ready(&self) -> Result<(), LockError<S::Error>> {
        let exists = self
            .store
            .table_exists()
            .await
            .map_err(|source| LockError::Store {
                operation: "describe table",
                source,
            })?;

        if !exists {
            tracing::info!(table = self.store.table_name(), "creating lock table");
            if let Err(source) = self.store.create_table().await {
                let exists_now =
                    self.store
                        .table_exists()
                        .await
                        .map_err(|source| LockError::Store {
                            operation: "describe table",
                            source,
                        })?;
                if !exists_now {
                    return Err(LockError::Store {
                        operation: "create table",
                        source,
                    });
                }
                tracing::debug!(
                    table = self.store.table_name(),
                    "lost lock table creation race; table exists"
                );
            }
        }

        let probe = TableActiveProbe { store: &self.store };
        wait_for_status(&probe, &self.poll)
            .await
            .map_err(LockError::Table)
    }

    /// Attempts one acquisition of `lock_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::AlreadyHeld`] when a live lease exists and
    /// [`LockError::Store`] when the conditional write fails.
    pub async fn acquire(&self, lock_id: &str) -> Result<(), LockError<S::Error>> {
        let now = epoch_seconds();
        let expires_at = now.saturating_add(duration_seconds(self.ttl));
        match self
            .store
            .put_if_absent_or_expired(lock_id, expires_at, now)
            .await
        {
            Ok(PutOutcome::Acquired) => Ok(()),
            Ok(PutOutcome::Held) => Err(LockError::AlreadyHeld {
                lock_id: lock_id.to_owned(),
            }),
            Err(source) => Err(LockError::Store {
                operation: "conditional put",
                source,
            }),
        }
    }

    /// Acquires `lock_id`, retrying contention on a fixed interval.
    ///
    /// Contention is expected to be transient (another operator mid-way
    /// through a provision or teardown), so losing attempts wait their turn
    /// rather than failing fast. Store failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when the budget elapses and
    /// [`LockError::Store`] when the conditional write fails.
    pub async fn acquire_with_retry(
        &self,
        lock_id: &str,
        retry: &AcquireRetry,
    ) -> Result<(), LockError<S::Error>> {
        let started = Instant::now();
        loop {
            match self.acquire(lock_id).await {
                Ok(()) => return Ok(()),
                Err(LockError::AlreadyHeld { .. }) => {
                    if started.elapsed() >= retry.budget {
                        return Err(LockError::Timeout {
                            lock_id: lock_id.to_owned(),
                            waited_secs: started.elapsed().as_secs(),
                        });
                    }
                    tracing::info!(
                        lock_id,
                        waited_secs = started.elapsed().as_secs(),
                        "lock held elsewhere; waiting"
                    );
                    sleep(retry.interval).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Releases `lock_id`. Releasing a lease not held is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] when the delete fails.
    pub async fn release(&self, lock_id: &str) -> Result<(), LockError<S::Error>> {
        self.store
            .delete(lock_id)
            .await
            .map_err(|source| LockError::Store {
                operation: "delete",
                source,
            })
    }

    /// Returns whether a live (unexpired) lease exists for `lock_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] when the read fails.
    pub async fn is_held(&self, lock_id: &str) -> Result<bool, LockError<S::Error>> {
        let expires_at = self
            .store
            .expires_at(lock_id)
            .await
            .map_err(|source| LockError::Store {
                operation: "get",
                source,
            })?;
        Ok(expires_at.is_some_and(|expiry| expiry > epoch_seconds()))
    }
}

/// Probe that waits for the lock table to report `ACTIVE`.
struct TableActiveProbe<'a, S: LockStore> {
    store: &'a S,
}

impl<S: LockStore> StatusProbe for TableActiveProbe<'_, S> {
    type Error = S::Error;

    fn current_status(&self) -> ProbeFuture<'_, String, Self::Error> {
        self.store.table_status()
    }

    fn is_target(&self, status: &str) -> bool {
        status == table_status::ACTIVE
    }

    fn is_error(&self, status: &str) -> bool {
        status == table_status::DELETING
    }

    fn resource_id(&self) -> &str {
        self.store.table_name()
    }

    fn resource_kind(&self) -> &'static str {
        "lock table"
    }
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

fn duration_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests;
