//! # Okuri インフラ層
//!
//! メッセージ配信パイプラインの外部接続を担当する。
//!
//! ## 責務
//!
//! - **メッセージストア**: PostgreSQL 上の messages テーブルと、
//!   条件付き更新・原子的インクリメントのプリミティブ
//! - **イベントブローカー**: Redis Streams による配信イベントの発行と購読
//! - **送信ゲートウェイ**: メール（SMTP / SES）と SMS（HTTP）の送信
//!
//! ## 依存関係
//!
//! ```text
//! dispatcher → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL 接続プールとマイグレーション
//! - [`redis`] - Redis 接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - メッセージストア
//! - [`messaging`] - 配信イベントの発行・購読
//! - [`notification`] - 送信ゲートウェイ
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use okuri_infra::{db, redis, repository::PostgresMessageRepository};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = db::create_pool(
//!         "postgres://localhost/okuri",
//!         10,
//!         std::time::Duration::from_secs(30),
//!     )
//!     .await?;
//!     db::run_migrations(&pool).await?;
//!     let repo = PostgresMessageRepository::new(pool);
//!
//!     let conn = redis::create_connection_manager("redis://localhost").await?;
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod messaging;
pub mod notification;
pub mod redis;
pub mod repository;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{InfraError, InfraErrorKind};
