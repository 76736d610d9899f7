//! MemoryTaskSource - テスト・デモ用の永続化層
//!
//! # 実装詳細
//! - BTreeMap<u64, Entry> で挿入順を保持（seq はモーブしても変わらない）
//! - HashMap<TaskKey, u64> で identity から seq を引く
//! - std::sync::Mutex で排他制御（クリティカルセクションは短い）
//!
//! ハンドルを複製すると同じデータを共有する別ハンドルになるので、
//! テストでは close 後に「再オープン」を再現できます。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{SourceError, Task, TaskKey, TaskState};
use crate::ports::TaskSource;

#[derive(Debug, Clone)]
struct Entry {
    state: TaskState,
    task: Task,
}

#[derive(Debug, Default)]
struct MemoryData {
    entries: BTreeMap<u64, Entry>,
    index: HashMap<TaskKey, u64>,
    next_seq: u64,
}

impl MemoryData {
    fn entry_mut(&mut self, key: &TaskKey) -> Option<&mut Entry> {
        let seq = self.index.get(key)?;
        self.entries.get_mut(seq)
    }
}

/// In-memory task source.
///
/// Not durable across processes; durable across handles of the same data.
#[derive(Debug, Default)]
pub struct MemoryTaskSource {
    data: Arc<Mutex<MemoryData>>,
    closed: AtomicBool,
}

impl MemoryTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, open handle over the same data.
    pub fn handle(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryData>, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        self.data.lock().map_err(|_| SourceError::Poisoned)
    }
}

impl Clone for MemoryTaskSource {
    fn clone(&self) -> Self {
        self.handle()
    }
}

#[async_trait]
impl TaskSource for MemoryTaskSource {
    async fn scan(&self, state: TaskState) -> Result<Vec<Task>, SourceError> {
        let data = self.lock()?;
        Ok(data
            .entries
            .values()
            .filter(|entry| entry.state == state)
            .map(|entry| entry.task.clone())
            .collect())
    }

    async fn get(&self, key: &TaskKey) -> Result<Option<(TaskState, Task)>, SourceError> {
        let data = self.lock()?;
        Ok(data
            .index
            .get(key)
            .and_then(|seq| data.entries.get(seq))
            .map(|entry| (entry.state, entry.task.clone())))
    }

    async fn insert(&self, state: TaskState, task: &Task) -> Result<bool, SourceError> {
        let mut data = self.lock()?;
        let key = task.key();
        if data.index.contains_key(&key) {
            return Ok(false);
        }
        let seq = data.next_seq;
        data.next_seq += 1;
        data.entries.insert(
            seq,
            Entry {
                state,
                task: task.clone(),
            },
        );
        data.index.insert(key, seq);
        Ok(true)
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<bool, SourceError> {
        let mut data = self.lock()?;
        match data.entry_mut(key) {
            Some(entry) if entry.state == from => {
                entry.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, key: &TaskKey, last_attempt: DateTime<Utc>) -> Result<bool, SourceError> {
        let mut data = self.lock()?;
        match data.entry_mut(key) {
            Some(entry) => {
                entry.task.last_attempt = last_attempt;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, SourceError> {
        let mut data = self.lock()?;
        match data.index.remove(key) {
            Some(seq) => {
                data.entries.remove(&seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SourceError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(tag: &str) -> Task {
        Task::new(tag, "dc2", Duration::ZERO)
    }

    #[tokio::test]
    async fn insert_rejects_identity_in_any_state() {
        let source = MemoryTaskSource::new();
        let t = task("a");
        assert!(source.insert(TaskState::Pending, &t).await.unwrap());
        assert!(!source.insert(TaskState::Pending, &t).await.unwrap());
        assert!(!source.insert(TaskState::Failed, &t).await.unwrap());
    }

    #[tokio::test]
    async fn transition_keeps_insertion_position() {
        let source = MemoryTaskSource::new();
        let (a, b) = (task("a"), task("b"));
        source.insert(TaskState::Pending, &a).await.unwrap();
        source.insert(TaskState::Pending, &b).await.unwrap();

        assert!(source.transition(&a.key(), TaskState::Pending, TaskState::Failed).await.unwrap());
        assert!(source.transition(&a.key(), TaskState::Failed, TaskState::Pending).await.unwrap());

        let tags: Vec<_> = source
            .scan(TaskState::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.tag)
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn transition_requires_source_state() {
        let source = MemoryTaskSource::new();
        let a = task("a");
        source.insert(TaskState::Pending, &a).await.unwrap();
        assert!(!source.transition(&a.key(), TaskState::Failed, TaskState::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn handles_share_data_but_close_independently() {
        let source = MemoryTaskSource::new();
        let a = task("a");
        source.insert(TaskState::Failed, &a).await.unwrap();
        source.close().await.unwrap();

        assert!(matches!(source.scan(TaskState::Failed).await, Err(SourceError::Closed)));
        assert!(matches!(source.close().await, Err(SourceError::Closed)));

        let reopened = source.handle();
        assert_eq!(reopened.scan(TaskState::Failed).await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn touch_and_delete_report_unknown_keys() {
        let source = MemoryTaskSource::new();
        let a = task("a");
        assert!(!source.touch(&a.key(), Utc::now()).await.unwrap());
        assert!(!source.delete(&a.key()).await.unwrap());
    }
}
