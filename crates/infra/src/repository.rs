//! # リポジトリ実装
//!
//! ドメイン層のメッセージエンティティを永続化する。
//!
//! - **単一文による更新**: 状態変更はすべて 1 本の UPDATE 文で行い、
//!   アプリケーション側の read-modify-write を持たない
//! - **テスタビリティ**: トレイト経由でモック可能な設計

pub mod message_repository;

pub use message_repository::{MessageRepository, PostgresMessageRepository};
