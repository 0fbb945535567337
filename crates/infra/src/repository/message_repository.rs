//! # MessageRepository
//!
//! 配信対象メッセージの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **条件付き更新**: `mark_sent` は `sent_at IS NULL` を WHERE 句に含め、
//!   同じ ID への並行呼び出しでも最初の 1 回だけが適用される
//! - **原子的インクリメント**: `increment_retry` は `retried_count + 1` を
//!   DB 上で計算し、メモリ上の値との比較・交換をしない
//! - **追記のみのログ**: `mark_failed` は `COALESCE(log, '') || $entry` で連結する
//!
//! どの操作も単一の文であり、途中でキャンセルされても
//! レコードが部分的に更新されることはない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use okuri_domain::message::{Message, MessageId, MessagePayload, MessageQuery, MessageRecord};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// メッセージリポジトリトレイト
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// メッセージを挿入する
    ///
    /// `retried_count = 0`、`sent_at = NULL`、`log = NULL` で保存し、ID を返す。
    async fn insert(&self, message: &Message) -> Result<MessageId, InfraError>;

    /// 検索条件に一致するメッセージをすべて返す
    async fn query(&self, query: &MessageQuery) -> Result<Vec<Message>, InfraError>;

    /// ID でメッセージを検索する
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, InfraError> {
        let found = self.query(&MessageQuery::ById(id.clone())).await?;
        Ok(found.into_iter().next())
    }

    /// 未送信なら送信済みにする
    ///
    /// 適用されたら `true`、既に送信済み（または存在しない）なら `false` を返す。
    /// 二回目以降の呼び出しはエラーではない。
    async fn mark_sent(&self, id: &MessageId, now: DateTime<Utc>) -> Result<bool, InfraError>;

    /// 配信失敗のログを追記し、`updated_at` を更新する
    ///
    /// `sent_at` と `retried_count` には触れない。
    async fn mark_failed(
        &self,
        id: &MessageId,
        entry: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// 再送回数を 1 増やし、`updated_at` を更新する
    async fn increment_retry(&self, id: &MessageId, now: DateTime<Utc>) -> Result<(), InfraError>;
}

/// PostgreSQL 実装の MessageRepository
#[derive(Debug, Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// messages テーブルの行
#[derive(sqlx::FromRow)]
struct MessageRow {
    id:            Uuid,
    payload:       Json<MessagePayload>,
    created_at:    DateTime<Utc>,
    updated_at:    DateTime<Utc>,
    sent_at:       Option<DateTime<Utc>>,
    retried_count: i32,
    log:           Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = InfraError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let retried_count = u32::try_from(row.retried_count).map_err(|_| {
            InfraError::unexpected(format!(
                "retried_count が負の値です: id={}, retried_count={}",
                row.id, row.retried_count
            ))
        })?;

        Ok(Message::from_db(MessageRecord {
            id: MessageId::from_uuid(row.id),
            payload: row.payload.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            retried_count,
            log: row.log,
        }))
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, payload, created_at, updated_at, sent_at, retried_count, log
    FROM messages
"#;

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(message_id = %message.id()))]
    async fn insert(&self, message: &Message) -> Result<MessageId, InfraError> {
        let kind: &str = message.kind().into();

        sqlx::query(
            r#"
            INSERT INTO messages (id, kind, payload, created_at, updated_at, sent_at, retried_count, log)
            VALUES ($1, $2, $3, $4, $4, NULL, 0, NULL)
            "#,
        )
        .bind(message.id().as_uuid())
        .bind(kind)
        .bind(Json(message.payload()))
        .bind(message.created_at())
        .execute(&self.pool)
        .await?;

        Ok(message.id().clone())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn query(&self, query: &MessageQuery) -> Result<Vec<Message>, InfraError> {
        let rows: Vec<MessageRow> = match query {
            MessageQuery::ById(id) => {
                sqlx::query_as::<_, MessageRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
                    .bind(id.as_uuid())
                    .fetch_all(&self.pool)
                    .await?
            }
            MessageQuery::ResendCandidates {
                kind,
                cutoff,
                max_retries,
            } => {
                let kind: &str = (*kind).into();
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"{SELECT_COLUMNS}
                    WHERE kind = $1
                      AND sent_at IS NULL
                      AND retried_count < $2
                      AND (
                        (retried_count = 0 AND created_at < $3)
                        OR (retried_count > 0 AND updated_at < $3)
                      )
                    ORDER BY created_at
                    "#
                ))
                .bind(kind)
                .bind(i64::from(*max_retries))
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Message::try_from).collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(message_id = %id))]
    async fn mark_sent(&self, id: &MessageId, now: DateTime<Utc>) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET sent_at = $2, updated_at = $2
            WHERE id = $1 AND sent_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(message_id = %id))]
    async fn mark_failed(
        &self,
        id: &MessageId,
        entry: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET log = COALESCE(log, '') || $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(entry)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(message_id = %id))]
    async fn increment_retry(&self, id: &MessageId, now: DateTime<Utc>) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET retried_count = retried_count + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
