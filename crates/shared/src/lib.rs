//! # Okuri 共有ユーティリティ
//!
//! 全クレートから使うロギング基盤とログフィールド規約を提供する。
//!
//! - ビジネスロジックを含まない
//! - 外部クレートへの依存は tracing 系に限る

pub mod event_log;
pub mod observability;
