//! Errors - エラー型と分類
//!
//! - StoreError: Store の呼び出し元に返すエラー
//! - SourceError: 永続化層（TaskSource）のエラー。Store は包まずにそのまま返す
//! - ValidatorError: RemoteValidator のエラー。起動時の sweep を失敗させる

use thiserror::Error;

use super::task::TaskKey;

/// Errors returned by [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity is already present in pending or failed.
    #[error("task already exists: {0}")]
    TaskExists(TaskKey),

    /// The identity is absent from the collection the call expected.
    #[error("task not found: {0}")]
    TaskNotFound(TaskKey),

    /// The store was closed.
    #[error("store is closed")]
    Closed,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("reconciliation aborted: {0}")]
    Validator(#[from] ValidatorError),
}

/// Errors raised by a persistence substrate.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed timestamp in stored task: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("malformed delay in stored task: {0}ns")]
    Delay(i64),

    #[error("delay too large to store: {0:?}")]
    DelayTooLarge(std::time::Duration),

    #[error("malformed state in stored task: {0}")]
    State(#[from] super::state::UnknownTaskState),

    #[error("task source lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("task source is closed")]
    Closed,
}

/// Error returned by a validity oracle.
#[derive(Debug, Error)]
#[error("validator failed for {key}: {message}")]
pub struct ValidatorError {
    pub key: TaskKey,
    pub message: String,
}

impl ValidatorError {
    pub fn new(key: TaskKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}
