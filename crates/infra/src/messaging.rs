//! # 配信イベントの発行・購読
//!
//! 作成・再送時の配信イベント（[`DispatchEvent`]）をブローカーに渡し、
//! ワーカーが種別ごとのトピックから受け取るための抽象化。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: 発行は [`EventPublisher`]、購読は [`EventConsumer`]
//! - **種別ごとのトピック**: メールと SMS は別ストリームに発行し、
//!   それぞれのワーカーが購読する（[`topic_name`]）
//! - **少なくとも 1 回**: 同じ ID のイベントは重複しうる。ワーカー側で
//!   送信済みチェックを行う前提で、ブローカーは重複排除をしない
//!
//! 発行失敗は呼び出し元に返す。失われた発行はストア上のレコードが
//! 未送信のまま残るため、次の再送スイープで再検出される。

mod redis_stream;

use async_trait::async_trait;
use okuri_domain::message::{DispatchEvent, MessageKind};
pub use redis_stream::{RedisStreamConsumer, RedisStreamPublisher};

use crate::error::InfraError;

/// トピック名の接頭辞
const TOPIC_PREFIX: &str = "okuri:dispatch";

/// 種別ごとのトピック名を返す
pub fn topic_name(kind: MessageKind) -> String {
    format!("{TOPIC_PREFIX}:{kind}")
}

/// 配信イベント発行トレイト
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// イベントを種別のトピックに発行する
    async fn publish(&self, kind: MessageKind, event: &DispatchEvent) -> Result<(), InfraError>;
}

/// 受信した配信イベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    /// ブローカー上の受信識別子（ack に使う）
    pub delivery_id: String,
    pub event:       DispatchEvent,
}

/// 配信イベント購読トレイト
///
/// 1 つの購読者は 1 つの種別のトピックだけを読む。
#[async_trait]
pub trait EventConsumer: Send {
    /// 受信済みのイベントをまとめて取り出す。無ければ空を返す
    async fn poll(&mut self) -> Result<Vec<ReceivedEvent>, InfraError>;

    /// 処理が終わったイベントを確認応答する
    async fn ack(&mut self, delivery_id: &str) -> Result<(), InfraError>;
}
