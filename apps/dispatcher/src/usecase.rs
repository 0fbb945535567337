//! # ユースケース層
//!
//! Dispatcher のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・発行者・時刻源を `Arc<dyn Trait>` で外部から注入
//! - **ストアの原子操作に依存**: プロセス内のロックは持たない。並行する
//!   ワーカーとスイープの整合性は条件付き UPDATE と原子的インクリメントで保つ
//!
//! ## モジュール構成
//!
//! - `message`: メッセージ作成（保存 → 配信イベント発行）
//! - `delivery`: 配信イベントを受けて送信し、結果を記録する
//! - `resend`: 未送信メッセージを再発行する定期スイープ

pub mod delivery;
pub mod message;
pub mod resend;

pub use delivery::{DeliveryOutcome, DeliveryWorker, SkipReason};
pub use message::MessageUseCase;
pub use resend::{ResendScheduler, SweepReport};
