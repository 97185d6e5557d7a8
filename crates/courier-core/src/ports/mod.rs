//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite, ファイルシステム, 配送先）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ストアが source of truth（正本）
//! - 遅い処理（ファイル移動・ネットワーク送信）はストアのトランザクション外で行う

pub mod clock;
pub mod outbox_store;
pub mod resource_store;
pub mod sender;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::outbox_store::OutboxStore;
pub use self::resource_store::ResourceStore;
pub use self::sender::Sender;
