//! # 再送スイープ
//!
//! 一定間隔で呼ばれ、取りこぼされた未送信メッセージの配信イベントを再発行する。
//!
//! ## 対象の条件
//!
//! `cutoff = now - grace` として、次をすべて満たすレコード:
//!
//! - 未送信（`sent_at` が NULL）
//! - `retried_count < max_retries`
//! - 未再送なら `created_at < cutoff`、再送済みなら `updated_at < cutoff`
//!
//! ## 発行 → インクリメントの順序
//!
//! 発行に成功したレコードだけ `retried_count` を増やす。発行後に
//! インクリメントが失敗した場合、そのレコードは次回も対象になりうる
//! （再送回数を使い切らずに余分に再発行される側に倒れる）。

use std::sync::Arc;

use okuri_domain::{
    clock::Clock,
    message::{DispatchEvent, MessageKind, MessageQuery, RetryPolicy},
};
use okuri_infra::{InfraError, messaging::EventPublisher, repository::MessageRepository};
use okuri_shared::{
    event_log::{error, event},
    log_business_event,
};

/// 1 回のスイープの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub kind:             MessageKind,
    /// 条件に合致したレコード数
    pub selected:         usize,
    /// 再発行できたレコード数
    pub republished:      usize,
    /// 発行に失敗しインクリメントを見送ったレコード数
    pub publish_failures: usize,
}

impl SweepReport {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            selected: 0,
            republished: 0,
            publish_failures: 0,
        }
    }
}

/// 再送スイープ
///
/// メッセージ種別ごとに 1 つ作る。
pub struct ResendScheduler {
    kind:      MessageKind,
    policy:    RetryPolicy,
    repo:      Arc<dyn MessageRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock:     Arc<dyn Clock>,
}

impl ResendScheduler {
    pub fn new(
        kind: MessageKind,
        policy: RetryPolicy,
        repo: Arc<dyn MessageRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            policy,
            repo,
            publisher,
            clock,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// スイープを 1 回実行する
    ///
    /// 対象の検索に失敗した場合だけエラーを返す。個別レコードの発行・
    /// インクリメントの失敗はログに残して次のレコードへ進む。
    #[tracing::instrument(skip_all, fields(message.kind = %self.kind))]
    pub async fn sweep(&self) -> Result<SweepReport, InfraError> {
        let now = self.clock.now();
        let query = MessageQuery::resend_candidates(self.kind, &self.policy, now);
        let candidates = self.repo.query(&query).await?;

        let mut report = SweepReport::empty(self.kind);
        report.selected = candidates.len();
        if candidates.is_empty() {
            tracing::info!("再送対象のメッセージはない");
            return Ok(report);
        }

        for message in candidates {
            let id = message.id().clone();
            let dispatch = DispatchEvent::new(id.clone());

            if let Err(e) = self.publisher.publish(self.kind, &dispatch).await {
                report.publish_failures += 1;
                tracing::warn!(
                    message.id = %id,
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::BROKER,
                    error = %e,
                    "再送イベントの発行に失敗したため再送回数を据え置く"
                );
                continue;
            }
            report.republished += 1;

            if let Err(e) = self.repo.increment_retry(&id, self.clock.now()).await {
                tracing::error!(
                    message.id = %id,
                    error.category = error::category::INFRASTRUCTURE,
                    error.kind = error::kind::DATABASE,
                    error = %e,
                    "再送回数の更新に失敗"
                );
                continue;
            }

            log_business_event!(
                event.category = event::category::RESEND,
                event.action = event::action::MESSAGE_REPUBLISHED,
                event.entity_id = %id,
                event.result = event::result::SUCCESS,
                message.kind = %self.kind,
                message.retried_count = message.retried_count() + 1,
                "未送信メッセージを再発行"
            );
        }

        let result = if report.publish_failures == 0 {
            event::result::SUCCESS
        } else {
            event::result::FAILURE
        };
        log_business_event!(
            event.category = event::category::RESEND,
            event.action = event::action::RESEND_SWEPT,
            event.result = result,
            message.kind = %self.kind,
            resend.selected = report.selected,
            resend.republished = report.republished,
            resend.publish_failures = report.publish_failures,
            "再送スイープ完了"
        );
        Ok(report)
    }
}
