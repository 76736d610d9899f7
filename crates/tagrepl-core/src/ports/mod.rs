//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（永続化層、validity oracle、時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod remote_validator;
pub mod task_source;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::remote_validator::RemoteValidator;
pub use self::task_source::TaskSource;
