//! # Dispatcher ライブラリ
//!
//! メッセージ作成・配信ワーカー・再送スイープのユースケースと、
//! それらを駆動する実行ループを公開する。

pub mod config;
pub mod error;
pub mod gateway;
pub mod runner;
pub mod usecase;
