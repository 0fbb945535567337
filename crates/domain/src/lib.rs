//! # Okuri ドメイン層
//!
//! 送信メッセージ（メール / SMS）の配信状態を表すドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **単一レコード型**: メールと SMS は [`message::MessagePayload`] の
//!   バリアントとして同じ [`message::MessageRecord`] に載せる
//! - **時刻の注入**: 現在時刻は [`clock::Clock`] 経由で受け取り、
//!   ドメインロジック内で `Utc::now()` を呼ばない
//! - **再送判定の一元化**: 再送対象かどうかの述語は
//!   [`message::MessageQuery`] に集約し、インメモリ実装と SQL 実装で共有する
//!
//! ## 依存関係の方向
//!
//! ```text
//! dispatcher → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`clock`] - 時刻プロバイダ
//! - [`error`] - ドメインエラー
//! - [`message`] - メッセージレコード、配信イベント、再送ポリシー
//! - [`notification`] - 送信ペイロードと送信エラー

pub mod clock;
pub mod error;
pub mod message;
pub mod notification;

pub use error::DomainError;
