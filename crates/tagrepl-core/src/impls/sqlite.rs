//! SqliteTaskSource - SQLite による永続化層
//!
//! # 実装詳細
//! - 単一テーブル + state 列 + (state, seq) index
//!   - pending <-> failed の移動は 1 回の UPDATE（torn state が起きない）
//!   - UNIQUE(tag, destination) で一意性を保証
//! - rusqlite は同期 API なので spawn_blocking で実行
//! - タイムスタンプは RFC 3339（ナノ秒）、delay は i64 のナノ秒で保存し、
//!   全フィールドを正確に往復させる（i64 に収まらない delay は拒否）

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{SourceError, Task, TaskKey, TaskState};
use crate::ports::TaskSource;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS replicate_tag_task (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    destination TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('pending', 'failed')),
    created_at TEXT NOT NULL,
    last_attempt TEXT NOT NULL,
    delay_ns INTEGER NOT NULL,
    UNIQUE (tag, destination)
);

CREATE INDEX IF NOT EXISTS idx_replicate_tag_task_state
ON replicate_tag_task(state, seq);
"#;

const SELECT_COLUMNS: &str = "tag, destination, state, created_at, last_attempt, delay_ns";

/// Default wait for a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw row as stored; converted to a `Task` outside the rusqlite row closure.
type TaskRow = (String, String, String, String, String, i64);

/// SQLite-backed task source.
///
/// The connection lives behind a mutex and is taken out on `close()`, so a
/// closed source rejects further calls instead of touching a dead handle.
/// Dropping the source without closing it closes the connection as well.
pub struct SqliteTaskSource {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteTaskSource {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, SourceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SourceError> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SourceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| SourceError::Poisoned)?;
            let conn = guard.as_mut().ok_or(SourceError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| SourceError::Join(e.to_string()))?
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, SourceError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn delay_to_ns(delay: Duration) -> Result<i64, SourceError> {
    i64::try_from(delay.as_nanos()).map_err(|_| SourceError::DelayTooLarge(delay))
}

fn delay_from_ns(raw: i64) -> Result<Duration, SourceError> {
    u64::try_from(raw)
        .map(Duration::from_nanos)
        .map_err(|_| SourceError::Delay(raw))
}

fn row_to_task(row: TaskRow) -> Result<(TaskState, Task), SourceError> {
    let (tag, destination, state, created_at, last_attempt, delay_ns) = row;
    let state = state.parse::<TaskState>()?;
    let task = Task {
        tag,
        destination,
        created_at: parse_ts(&created_at)?,
        last_attempt: parse_ts(&last_attempt)?,
        delay: delay_from_ns(delay_ns)?,
    };
    Ok((state, task))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

#[async_trait]
impl TaskSource for SqliteTaskSource {
    async fn scan(&self, state: TaskState) -> Result<Vec<Task>, SourceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM replicate_tag_task WHERE state = ?1 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map(params![state.as_str()], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|row| row_to_task(row).map(|(_, task)| task))
                .collect()
        })
        .await
    }

    async fn get(&self, key: &TaskKey) -> Result<Option<(TaskState, Task)>, SourceError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM replicate_tag_task
                         WHERE tag = ?1 AND destination = ?2"
                    ),
                    params![key.tag(), key.destination()],
                    read_row,
                )
                .optional()?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn insert(&self, state: TaskState, task: &Task) -> Result<bool, SourceError> {
        let task = task.clone();
        let delay_ns = delay_to_ns(task.delay)?;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO replicate_tag_task
                     (tag, destination, state, created_at, last_attempt, delay_ns)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (tag, destination) DO NOTHING",
                params![
                    task.tag,
                    task.destination,
                    state.as_str(),
                    format_ts(&task.created_at),
                    format_ts(&task.last_attempt),
                    delay_ns,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<bool, SourceError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE replicate_tag_task SET state = ?3
                 WHERE tag = ?1 AND destination = ?2 AND state = ?4",
                params![key.tag(), key.destination(), to.as_str(), from.as_str()],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn touch(&self, key: &TaskKey, last_attempt: DateTime<Utc>) -> Result<bool, SourceError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE replicate_tag_task SET last_attempt = ?3
                 WHERE tag = ?1 AND destination = ?2",
                params![key.tag(), key.destination(), format_ts(&last_attempt)],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, SourceError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM replicate_tag_task WHERE tag = ?1 AND destination = ?2",
                params![key.tag(), key.destination()],
            )?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn close(&self) -> Result<(), SourceError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| SourceError::Poisoned)?;
            let conn = guard.take().ok_or(SourceError::Closed)?;
            conn.close().map_err(|(_, e)| SourceError::Sqlite(e))
        })
        .await
        .map_err(|e| SourceError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(tag: &str) -> Task {
        let created = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let mut task = Task::new_at(tag, "dc2", Duration::from_millis(90_500), created);
        task.last_attempt = created + chrono::TimeDelta::milliseconds(2_250);
        task
    }

    #[tokio::test]
    async fn every_field_round_trips_exactly() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        let task = sample("repo:v1");
        assert!(source.insert(TaskState::Failed, &task).await.unwrap());

        let (state, stored) = source.get(&task.key()).await.unwrap().unwrap();
        assert_eq!(state, TaskState::Failed);
        assert_eq!(stored.created_at, task.created_at);
        assert_eq!(stored.last_attempt, task.last_attempt);
        assert_eq!(stored.delay, task.delay);
    }

    #[tokio::test]
    async fn conflicting_insert_writes_nothing() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        let task = sample("repo:v1");
        assert!(source.insert(TaskState::Pending, &task).await.unwrap());

        let mut other = sample("repo:v1");
        other.delay = Duration::ZERO;
        assert!(!source.insert(TaskState::Failed, &other).await.unwrap());

        assert_eq!(source.scan(TaskState::Failed).await.unwrap(), Vec::<Task>::new());
        assert_eq!(source.scan(TaskState::Pending).await.unwrap(), vec![task]);
    }

    #[tokio::test]
    async fn survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let (a, b) = (sample("a"), sample("b"));
        {
            let source = SqliteTaskSource::open(&path).unwrap();
            source.insert(TaskState::Pending, &a).await.unwrap();
            source.insert(TaskState::Pending, &b).await.unwrap();
            source
                .transition(&a.key(), TaskState::Pending, TaskState::Failed)
                .await
                .unwrap();
            source.close().await.unwrap();
        }

        let source = SqliteTaskSource::open(&path).unwrap();
        assert_eq!(source.scan(TaskState::Pending).await.unwrap(), vec![b]);
        assert_eq!(source.scan(TaskState::Failed).await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn closed_source_rejects_calls() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        source.close().await.unwrap();
        assert!(matches!(source.scan(TaskState::Pending).await, Err(SourceError::Closed)));
        assert!(matches!(source.close().await, Err(SourceError::Closed)));
    }

    #[tokio::test]
    async fn malformed_timestamp_is_reported() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        source
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO replicate_tag_task
                         (tag, destination, state, created_at, last_attempt, delay_ns)
                     VALUES ('t', 'd', 'pending', 'yesterday', 'yesterday', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            source.scan(TaskState::Pending).await,
            Err(SourceError::Timestamp(_))
        ));
    }

    #[tokio::test]
    async fn negative_delay_is_reported() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        let now = format_ts(&Utc::now());
        source
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO replicate_tag_task
                         (tag, destination, state, created_at, last_attempt, delay_ns)
                     VALUES ('t', 'd', 'failed', ?1, ?1, -5)",
                    params![now],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            source.scan(TaskState::Failed).await,
            Err(SourceError::Delay(-5))
        ));
    }

    #[tokio::test]
    async fn sub_millisecond_delay_round_trips() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        let mut task = sample("repo:v1");
        task.delay = Duration::from_nanos(1_500_001);
        source.insert(TaskState::Pending, &task).await.unwrap();

        let stored = source.scan(TaskState::Pending).await.unwrap();
        assert_eq!(stored, vec![task.clone()]);
        assert_eq!(stored[0].delay, Duration::from_nanos(1_500_001));
    }

    #[tokio::test]
    async fn delay_beyond_i64_nanos_is_rejected() {
        let source = SqliteTaskSource::open_in_memory().unwrap();
        let mut task = sample("repo:v1");
        task.delay = Duration::MAX;

        assert!(matches!(
            source.insert(TaskState::Pending, &task).await,
            Err(SourceError::DelayTooLarge(_))
        ));
        assert_eq!(source.get(&task.key()).await.unwrap(), None);
    }
}
