//! tagrepl-core
//!
//! Durable task store for tag replication retries.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Task, TaskKey, TaskState, errors）
//! - **ports**: 抽象化レイヤー（TaskSource, RemoteValidator, Clock）
//! - **impls**: 実装（SqliteTaskSource, MemoryTaskSource, StaticValidator）
//! - **store**: Store 本体（状態遷移 + 起動時の reconciliation sweep）
//! - **config**: 設定の読み込み
//! - **telemetry**: tracing の初期化

pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, StoreConfig};
pub use domain::{SourceError, StoreError, Task, TaskKey, TaskState, ValidatorError};
pub use store::{Store, SweepReport};
