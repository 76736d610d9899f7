//! Durable store of tag replication tasks.
//!
//! The store keeps two collections, pending and failed, over a [`TaskSource`]
//! and purges tasks the [`RemoteValidator`] rejects when it is opened.
//!
//! State transitions:
//! - `add_pending` / `add_failed`: create (identity must be new in both collections)
//! - pending -> failed: `mark_failed`
//! - failed -> pending: `mark_pending`
//! - pending / failed -> gone: `remove`, or the sweep at open

mod sweep;

pub use sweep::SweepReport;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::domain::{StoreError, Task, TaskKey, TaskState};
use crate::impls::{MemoryTaskSource, SqliteTaskSource};
use crate::ports::{Clock, RemoteValidator, TaskSource};

/// Persistent pending/failed task store.
///
/// Every check-and-mutate runs atomically inside the source, so concurrent
/// calls on one identity serialize there. The handle itself sits behind an
/// `RwLock`: calls share the read side, `close` takes the write side and
/// waits for in-flight calls to finish.
pub struct Store {
    source: RwLock<Option<Arc<dyn TaskSource>>>,
    sweep: SweepReport,
}

impl Store {
    /// Bind to `source` and run the reconciliation sweep.
    ///
    /// The store is returned only after every persisted task has been checked
    /// against `validator`. A validator error aborts the open.
    pub async fn open(
        source: Arc<dyn TaskSource>,
        validator: Arc<dyn RemoteValidator>,
    ) -> Result<Self, StoreError> {
        let sweep = sweep::reconcile(source.as_ref(), validator.as_ref()).await?;
        info!(
            retained_pending = sweep.retained_pending,
            retained_failed = sweep.retained_failed,
            purged_pending = sweep.purged_pending,
            purged_failed = sweep.purged_failed,
            "task store opened"
        );
        Ok(Self {
            source: RwLock::new(Some(source)),
            sweep,
        })
    }

    /// Open the source described by `config`: SQLite at `config.path`, or an
    /// in-memory source when no path is set.
    pub async fn open_with_config(
        config: &StoreConfig,
        validator: Arc<dyn RemoteValidator>,
    ) -> Result<Self, StoreError> {
        let source: Arc<dyn TaskSource> = match &config.path {
            Some(path) => {
                debug!(path = %path.display(), "opening sqlite task source");
                Arc::new(SqliteTaskSource::open_with_timeout(
                    path,
                    config.busy_timeout(),
                )?)
            }
            None => {
                debug!("no database path configured, using in-memory task source");
                Arc::new(MemoryTaskSource::new())
            }
        };
        Self::open(source, validator).await
    }

    /// Outcome of the reconciliation sweep run at open.
    pub fn sweep_report(&self) -> SweepReport {
        self.sweep
    }

    pub async fn add_pending(&self, task: &Task) -> Result<(), StoreError> {
        self.add(TaskState::Pending, task).await
    }

    pub async fn add_failed(&self, task: &Task) -> Result<(), StoreError> {
        self.add(TaskState::Failed, task).await
    }

    async fn add(&self, state: TaskState, task: &Task) -> Result<(), StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        if !source.insert(state, task).await? {
            return Err(StoreError::TaskExists(task.key()));
        }
        debug!(tag = %task.tag, destination = %task.destination, %state, "task added");
        Ok(())
    }

    /// Move a failed task back to pending.
    pub async fn mark_pending(&self, task: &Task) -> Result<(), StoreError> {
        self.mark(task, TaskState::Pending).await
    }

    /// Move a pending task to failed.
    pub async fn mark_failed(&self, task: &Task) -> Result<(), StoreError> {
        self.mark(task, TaskState::Failed).await
    }

    async fn mark(&self, task: &Task, to: TaskState) -> Result<(), StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        let key = task.key();
        if !source.transition(&key, to.opposite(), to).await? {
            return Err(StoreError::TaskNotFound(key));
        }
        debug!(tag = %task.tag, destination = %task.destination, state = %to, "task moved");
        Ok(())
    }

    /// Delete the task from whichever collection holds it.
    ///
    /// Removing an unknown identity succeeds and changes nothing.
    pub async fn remove(&self, task: &Task) -> Result<(), StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        let removed = source.delete(&task.key()).await?;
        debug!(tag = %task.tag, destination = %task.destination, removed, "task removed");
        Ok(())
    }

    /// Record an attempt at `at`, leaving every other field and the state untouched.
    pub async fn record_attempt(&self, task: &Task, at: DateTime<Utc>) -> Result<(), StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        let key = task.key();
        if !source.touch(&key, at).await? {
            return Err(StoreError::TaskNotFound(key));
        }
        Ok(())
    }

    /// Pending tasks in insertion order.
    pub async fn get_pending(&self) -> Result<Vec<Task>, StoreError> {
        self.scan(TaskState::Pending).await
    }

    /// Failed tasks in insertion order.
    pub async fn get_failed(&self) -> Result<Vec<Task>, StoreError> {
        self.scan(TaskState::Failed).await
    }

    /// Pending tasks whose delay has elapsed as of `clock.now()`, in insertion order.
    pub async fn get_ready(&self, clock: &dyn Clock) -> Result<Vec<Task>, StoreError> {
        let now = clock.now();
        let mut pending = self.get_pending().await?;
        pending.retain(|task| task.ready_at(now));
        Ok(pending)
    }

    async fn scan(&self, state: TaskState) -> Result<Vec<Task>, StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(source.scan(state).await?)
    }

    /// Which collection currently holds `key`, if any.
    pub async fn state_of(&self, key: &TaskKey) -> Result<Option<TaskState>, StoreError> {
        let guard = self.source.read().await;
        let source = guard.as_ref().ok_or(StoreError::Closed)?;
        let found = source.get(key).await?;
        Ok(found.map(|(state, _)| state))
    }

    /// Release the source. Every later call, including another `close`,
    /// returns [`StoreError::Closed`].
    pub async fn close(&self) -> Result<(), StoreError> {
        let source = self.source.write().await.take().ok_or(StoreError::Closed)?;
        source.close().await?;
        info!("task store closed");
        Ok(())
    }
}
