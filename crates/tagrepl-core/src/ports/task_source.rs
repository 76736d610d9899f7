//! TaskSource port - タスクの永続化層
//!
//! TaskSource は 2 つの論理 namespace（"pending", "failed"）を持つ
//! durable な key/value ストアの抽象です。key は (tag, destination)。
//!
//! # 実装
//! - **SqliteTaskSource**: 本番用（単一テーブル + state 列 + index）
//! - **MemoryTaskSource**: テスト・デモ用

use async_trait::async_trait;

use crate::domain::{SourceError, Task, TaskKey, TaskState};

/// TaskSource は pending / failed の正本（source of truth）
///
/// # 設計原則
/// - 各メソッドは原子的（check-and-mutate を 1 トランザクションで行う）
/// - 戻り値が成功なら永続化は完了している
/// - 一意性の判定はここで行う（Store 側でロックを持たない）
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// All tasks in `state`, in insertion order.
    async fn scan(&self, state: TaskState) -> Result<Vec<Task>, SourceError>;

    /// Look up a task and the collection holding it.
    async fn get(&self, key: &TaskKey) -> Result<Option<(TaskState, Task)>, SourceError>;

    /// Insert into `state`. Returns `false` (and writes nothing) if the identity
    /// is already present in any state.
    async fn insert(&self, state: TaskState, task: &Task) -> Result<bool, SourceError>;

    /// Move `key` from `from` to `to`, keeping every field. Returns `false` if
    /// the identity is not in `from`.
    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<bool, SourceError>;

    /// Overwrite `last_attempt`. Returns `false` if the identity is unknown.
    async fn touch(
        &self,
        key: &TaskKey,
        last_attempt: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, SourceError>;

    /// Delete from whichever collection holds `key`. Returns `false` if unknown.
    async fn delete(&self, key: &TaskKey) -> Result<bool, SourceError>;

    /// Release the underlying handle. Later calls fail with `SourceError::Closed`.
    async fn close(&self) -> Result<(), SourceError>;
}
