//! # ドメイン層エラー定義
//!
//! 送信できない形のペイロードを作成時点で弾くためのエラー。
//! 配信時の失敗は [`NotificationError`](crate::notification::NotificationError) で表す。

use thiserror::Error;

use crate::message::MessageKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// 必須項目が空（区切り文字や空白だけの場合を含む）
    #[error("{kind} の {field} は必須です")]
    MissingField {
        kind:  MessageKind,
        field: &'static str,
    },
}

impl DomainError {
    pub(crate) fn missing(kind: MessageKind, field: &'static str) -> Self {
        Self::MissingField { kind, field }
    }
}
