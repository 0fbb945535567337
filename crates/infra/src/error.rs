//! # インフラ層エラー定義
//!
//! メッセージストア（PostgreSQL）と配信イベントのブローカー（Redis Streams）で
//! 起きた失敗を 1 つの型にまとめる。
//!
//! [`InfraError`] は種別 [`InfraErrorKind`] と、生成時点の [`SpanTrace`] を持つ。
//! 配信ワーカーや再送スイープはメッセージ ID をスパンに載せているので、
//! ログに出たエラーから「どのメッセージのどの操作か」を辿れる。
//!
//! 送信プロバイダの失敗はここでは扱わない。それは
//! [`NotificationError`](okuri_domain::notification::NotificationError) として
//! レコードのログに追記される。

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// ストア・ブローカー操作の失敗
///
/// ```ignore
/// if let InfraErrorKind::Database(_) = error.kind() {
///     // ストア障害
/// }
/// ```
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// [`InfraError`] の種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// メッセージストアへのクエリ失敗（接続断・制約違反を含む）
    #[error("データベースエラー: {0}")]
    Database(#[from] sqlx::Error),

    /// ストリームへの XADD / XREADGROUP / XACK の失敗
    #[error("Redis エラー: {0}")]
    Redis(#[from] redis::RedisError),

    /// ペイロードまたは配信イベントの JSON 変換失敗
    #[error("シリアライズエラー: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ストリーム応答の形が想定と違うなど、ブローカー側の異常
    #[error("ブローカーエラー: {0}")]
    Broker(String),

    /// 保存済みの値がドメインの制約を満たさない
    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

impl InfraError {
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        InfraErrorKind::Broker(msg.into()).into()
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        InfraErrorKind::Unexpected(msg.into()).into()
    }
}

/// 種別からの変換。ここで現在のスパンを記録する。
impl From<InfraErrorKind> for InfraError {
    fn from(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        InfraErrorKind::from(source).into()
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(source: redis::RedisError) -> Self {
        InfraErrorKind::from(source).into()
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        InfraErrorKind::from(source).into()
    }
}

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfraError({:?})", self.kind)?;
        if f.alternate() {
            write!(f, "\n{}", self.span_trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}
