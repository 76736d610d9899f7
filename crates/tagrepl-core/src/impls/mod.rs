//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteTaskSource**: 本番用の永続化層
//! - **MemoryTaskSource**: テスト・デモ用の永続化層
//! - **StaticValidator**: 固定ルールの validity oracle

pub mod memory;
pub mod sqlite;
pub mod static_validator;

pub use self::memory::MemoryTaskSource;
pub use self::sqlite::SqliteTaskSource;
pub use self::static_validator::StaticValidator;
