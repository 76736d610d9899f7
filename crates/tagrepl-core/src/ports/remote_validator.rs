//! RemoteValidator port - (tag, destination) がまだリトライに値するかを判定
//!
//! 実体はネットワーク越しの問い合わせ（タグが消えた、宛先が廃止された、など）。
//! Store は起動時の reconciliation sweep でのみ呼び出します。

use async_trait::async_trait;

use crate::domain::ValidatorError;

/// RemoteValidator は validity oracle
///
/// # 契約
/// - `Ok(true)`: タスクを残す
/// - `Ok(false)`: タスクを永続的に削除する
/// - `Err(_)`: Store の open を失敗させる（fail-fast）
/// - レイテンシやリトライの契約はない（Store は完了まで待つ）
#[async_trait]
pub trait RemoteValidator: Send + Sync {
    async fn valid(&self, tag: &str, destination: &str) -> Result<bool, ValidatorError>;
}
