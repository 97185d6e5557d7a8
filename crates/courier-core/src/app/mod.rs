//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder / Runtime**: 構成要素のワイヤリング
//! - **Producer**: Record + QueueEntry の原子的な書き込み
//! - **WorkerLoop**: 配送ループ（claim→deliver→complete / record_failure）
//! - **ReaperLoop**: lease 期限切れと再試行期限の回収
//! - **Supervisor**: Worker 群と Sweeper の起動・停止

pub mod builder;
pub mod delivery;
pub mod producer;
pub mod reaper_loop;
pub mod status;
pub mod supervisor;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Runtime, RuntimeBuilder};
pub use self::delivery::DeliveryExecutor;
pub use self::producer::{FEED_PATHS, Producer};
pub use self::reaper_loop::ReaperLoop;
pub use self::status::StatusCounts;
pub use self::supervisor::Supervisor;
pub use self::worker_loop::WorkerLoop;
