//! # Dispatcher エラー定義
//!
//! メッセージ作成フローで呼び出し元に返すエラーを定義する。
//!
//! 配信ワーカーと再送スイープはエラーを返さない。送信失敗はレコードの
//! ログに、ストア・ブローカー障害は tracing に記録して処理を続ける。

use okuri_domain::{DomainError, message::MessageId};
use okuri_infra::InfraError;
use thiserror::Error;

/// メッセージ作成で発生するエラー
#[derive(Debug, Error)]
pub enum DispatchError {
    /// ペイロードが不正（レコードは作成されていない）
    #[error("入力が不正です: {0}")]
    Validation(#[from] DomainError),

    /// ストアへの書き込みに失敗（レコードは作成されていない）
    #[error("ストアエラー: {0}")]
    Store(#[source] InfraError),

    /// 配信イベントの発行に失敗
    ///
    /// レコードは保存済みで、次の再送スイープで再発行される。
    #[error("配信イベントの発行に失敗しました（id: {id}）: {source}")]
    Publish {
        id:     MessageId,
        #[source]
        source: InfraError,
    },
}

impl DispatchError {
    /// 保存済みのメッセージ ID（発行失敗の場合のみ）
    pub fn persisted_id(&self) -> Option<&MessageId> {
        match self {
            Self::Publish { id, .. } => Some(id),
            _ => None,
        }
    }
}
