//! Redis Streams による配信イベントの発行・購読
//!
//! - 発行: `XADD <topic> MAXLEN ~ <n> * event <json>`
//! - 購読: コンシューマーグループで `XREADGROUP ... >` を読み、処理後に `XACK`
//!
//! 購読はブロッキング読み取りを使わず、呼び出し側がポーリング間隔を決める。
//! 購読者名は再起動をまたいで固定する想定で、起動直後に自分宛ての保留
//! エントリ（ack 前に停止した分）を読み直してから新着に移る。

use async_trait::async_trait;
use okuri_domain::message::{DispatchEvent, MessageKind};
use redis::{
    aio::ConnectionManager,
    streams::{StreamId, StreamReadReply},
};

use super::{EventConsumer, EventPublisher, ReceivedEvent, topic_name};
use crate::error::InfraError;

/// ストリームエントリ内でイベント本体を格納するフィールド名
const EVENT_FIELD: &str = "event";

/// ストリームの概算上限長
const STREAM_MAX_LEN: usize = 100_000;

/// Redis Streams への発行
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    #[tracing::instrument(skip_all, level = "debug", fields(message_id = %event.id, kind = %kind))]
    async fn publish(&self, kind: MessageKind, event: &DispatchEvent) -> Result<(), InfraError> {
        let body = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();

        let entry_id: String = redis::cmd("XADD")
            .arg(topic_name(kind))
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg(EVENT_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(entry_id, "配信イベントを発行");
        Ok(())
    }
}

/// XREADGROUP に渡す読み出し位置
///
/// 起動直後は `0` で自分宛ての未 ack エントリ（前回 ack 前に停止した分）を
/// 読み直し、それが空になってから `>` で新着を読む。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReadCursor {
    backlog_drained: bool,
}

impl ReadCursor {
    fn id(self) -> &'static str {
        if self.backlog_drained { ">" } else { "0" }
    }

    /// 読み出し結果の件数を反映する
    fn observe(&mut self, entries: usize) {
        if !self.backlog_drained && entries == 0 {
            self.backlog_drained = true;
        }
    }
}

/// Redis Streams コンシューマーグループからの購読
pub struct RedisStreamConsumer {
    conn:       ConnectionManager,
    topic:      String,
    group:      String,
    consumer:   String,
    batch_size: usize,
    cursor:     ReadCursor,
}

impl RedisStreamConsumer {
    /// 購読者を作成し、コンシューマーグループが無ければ作る
    ///
    /// # 引数
    ///
    /// - `kind`: 購読するメッセージ種別
    /// - `group`: コンシューマーグループ名（同じグループの購読者でエントリを分け合う）
    /// - `consumer`: グループ内でこの購読者を識別する名前
    /// - `batch_size`: 1 回の `poll` で取り出す最大件数
    pub async fn connect(
        conn: ConnectionManager,
        kind: MessageKind,
        group: impl Into<String>,
        consumer: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, InfraError> {
        let this = Self {
            conn,
            topic: topic_name(kind),
            group: group.into(),
            consumer: consumer.into(),
            batch_size,
            cursor: ReadCursor::default(),
        };
        this.ensure_group().await?;
        Ok(this)
    }

    async fn ensure_group(&self) -> Result<(), InfraError> {
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.topic)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(topic = %self.topic, group = %self.group, "コンシューマーグループを作成");
                Ok(())
            }
            // 既存グループ
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// ストリームエントリを配信イベントに変換する
    fn decode(&self, entry_id: &str, body: Option<String>) -> Option<DispatchEvent> {
        let Some(body) = body else {
            tracing::warn!(topic = %self.topic, entry_id, "event フィールドの無いエントリを破棄");
            return None;
        };
        match serde_json::from_str(&body) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(
                    topic = %self.topic,
                    entry_id,
                    error = %e,
                    "解釈できないエントリを破棄"
                );
                None
            }
        }
    }
}

#[async_trait]
impl EventConsumer for RedisStreamConsumer {
    async fn poll(&mut self) -> Result<Vec<ReceivedEvent>, InfraError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("STREAMS")
            .arg(&self.topic)
            .arg(self.cursor.id())
            .query_async(&mut self.conn)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();
        if !self.cursor.backlog_drained && !entries.is_empty() {
            tracing::info!(topic = %self.topic, count = entries.len(), "未 ack のエントリを再処理");
        }
        self.cursor.observe(entries.len());

        let mut received = Vec::new();
        let mut malformed = Vec::new();
        for entry in entries {
            match self.decode(&entry.id, entry.get::<String>(EVENT_FIELD)) {
                Some(event) => received.push(ReceivedEvent {
                    delivery_id: entry.id,
                    event,
                }),
                None => malformed.push(entry.id),
            }
        }

        // 壊れたエントリは再読させない
        for entry_id in malformed {
            self.ack(&entry_id).await?;
        }

        Ok(received)
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<(), InfraError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(delivery_id)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        fn assert_send<T: Send>() {}
        assert_send_sync::<RedisStreamPublisher>();
        assert_send::<RedisStreamConsumer>();
    }

    #[test]
    fn test_起動直後は未ackのエントリから読む() {
        let mut cursor = ReadCursor::default();
        assert_eq!(cursor.id(), "0");

        cursor.observe(3);
        assert_eq!(cursor.id(), "0");

        cursor.observe(0);
        assert_eq!(cursor.id(), ">");
    }

    #[test]
    fn test_新着に切り替えた後は空振りしても戻らない() {
        let mut cursor = ReadCursor::default();
        cursor.observe(0);
        cursor.observe(0);
        cursor.observe(5);

        assert_eq!(cursor.id(), ">");
    }
}
