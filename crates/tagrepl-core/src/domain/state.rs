//! State - タスクの状態（= 保存先のコレクション）
//!
//! タスク自身は状態フィールドを持ちません。
//! どちらのコレクションに入っているかが状態です。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TaskState はタスクが置かれているコレクション
///
/// # 状態遷移
/// - pending -> failed: `mark_failed`
/// - failed -> pending: `mark_pending`
/// - pending / failed -> (削除): `remove` または起動時の reconciliation sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Awaiting (or eligible for) execution.
    Pending,

    /// The most recent attempt did not succeed.
    Failed,
}

impl TaskState {
    /// Namespace name used by persistence substrates.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Failed => "failed",
        }
    }

    /// The collection a `mark_*` call moves a task out of.
    pub fn opposite(self) -> Self {
        match self {
            TaskState::Pending => TaskState::Failed,
            TaskState::Failed => TaskState::Pending,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state: {0}")]
pub struct UnknownTaskState(pub String);

impl FromStr for TaskState {
    type Err = UnknownTaskState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "failed" => Ok(TaskState::Failed),
            other => Err(UnknownTaskState(other.to_string())),
        }
    }
}
