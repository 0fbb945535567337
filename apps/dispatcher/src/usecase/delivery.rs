//! # 配信ワーカー
//!
//! 配信イベント `{id}` を受けてメッセージを送信し、結果をストアに記録する。
//!
//! ```text
//! 受信 → 読み込み ─┬─ 不在 / 送信済み → 終了（送信もストア更新もしない）
//!                  └─ 未送信 → 送信 ─┬─ 成功 → mark_sent
//!                                    └─ 失敗 → mark_failed（再送はスイープに任せる）
//! ```
//!
//! 同じ ID のイベントが重複・逆順で届いても安全に処理できる。
//! 読み込みと mark_sent の間に別ワーカーが送信済みにした場合、
//! 条件付き更新が空振りするだけで `sent_at` は最初の値のまま残る。

use std::{sync::Arc, time::Duration};

use okuri_domain::{
    clock::Clock,
    message::{DispatchEvent, MessagePayload, failure_log_entry},
    notification::NotificationError,
};
use okuri_infra::{InfraError, notification::NotificationGateway, repository::MessageRepository};
use okuri_shared::{
    event_log::{error, event},
    log_business_event,
};

/// 1 件の配信イベントの処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 送信に成功し送信済みにした
    Sent,
    /// 送信に失敗しログに記録した
    Failed,
    /// 送信せずに終了した
    Skipped(SkipReason),
}

/// 送信しなかった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// レコードが存在しない
    NotFound,
    /// 既に送信済み
    AlreadySent,
}

/// 配信ワーカー
pub struct DeliveryWorker {
    repo:         Arc<dyn MessageRepository>,
    gateway:      NotificationGateway,
    clock:        Arc<dyn Clock>,
    send_timeout: Duration,
}

impl DeliveryWorker {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        gateway: NotificationGateway,
        clock: Arc<dyn Clock>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
            send_timeout,
        }
    }

    /// 配信イベントを処理する
    ///
    /// 送信エラーはレコードのログに変換され、ここからは返らない。
    /// 返るのはストア操作の失敗のみで、その場合レコードは直前の状態のまま残る。
    #[tracing::instrument(skip_all, fields(message.id = %dispatch.id))]
    pub async fn handle(&self, dispatch: &DispatchEvent) -> Result<DeliveryOutcome, InfraError> {
        let Some(message) = self.repo.find_by_id(&dispatch.id).await? else {
            tracing::warn!("配信対象のメッセージが見つからない");
            return Ok(DeliveryOutcome::Skipped(SkipReason::NotFound));
        };
        if message.is_sent() {
            tracing::debug!("送信済みのためスキップ");
            return Ok(DeliveryOutcome::Skipped(SkipReason::AlreadySent));
        }

        let kind = message.kind();
        match self.send(message.payload()).await {
            Ok(()) => {
                let applied = self.repo.mark_sent(&dispatch.id, self.clock.now()).await?;
                if !applied {
                    tracing::debug!("並行する配信が先に送信済みにしていた");
                }
                log_business_event!(
                    event.category = event::category::MESSAGE,
                    event.action = event::action::MESSAGE_SENT,
                    event.entity_id = %dispatch.id,
                    event.result = event::result::SUCCESS,
                    message.kind = %kind,
                    "メッセージを送信"
                );
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) => {
                self.repo
                    .mark_failed(&dispatch.id, &failure_log_entry(&e), self.clock.now())
                    .await?;
                log_business_event!(
                    event.category = event::category::MESSAGE,
                    event.action = event::action::MESSAGE_FAILED,
                    event.entity_id = %dispatch.id,
                    event.result = event::result::FAILURE,
                    message.kind = %kind,
                    message.retried_count = message.retried_count(),
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::DELIVERY,
                    error = %e,
                    "メッセージの送信に失敗"
                );
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    async fn send(&self, payload: &MessagePayload) -> Result<(), NotificationError> {
        tokio::time::timeout(self.send_timeout, self.gateway.send(payload))
            .await
            .map_err(|_| NotificationError::Timeout(self.send_timeout))?
    }
}
