//! # 実行ループ
//!
//! ブローカーから配信イベントを受け取るコンシューマループと、
//! 再送スイープを一定間隔で呼ぶタイマーループを提供する。
//!
//! どちらも `watch::Receiver<bool>` で停止を受け取り、処理中の 1 件を
//! 終えてから抜ける。ストア操作は単一文なので、途中で止まっても
//! レコードが中途半端に更新されることはない。

use std::{sync::Arc, time::Duration};

use okuri_infra::messaging::EventConsumer;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};

use crate::usecase::{DeliveryOutcome, DeliveryWorker, ResendScheduler};

/// 停止シグナルの受信側
pub type Shutdown = watch::Receiver<bool>;

/// 停止が要求されているか
fn is_shutdown(shutdown: &Shutdown) -> bool {
    *shutdown.borrow()
}

/// `duration` 待つ。途中で停止が要求されたら `true` を返す
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => is_shutdown(shutdown),
        // 送信側が破棄された場合も停止とみなす
        changed = shutdown.changed() => changed.is_err() || is_shutdown(shutdown),
    }
}

/// 配信イベントを購読し、停止が要求されるまで処理し続ける
///
/// 処理結果にかかわらずイベントは ack する。ストア障害で処理できなかった
/// レコードは未送信のまま残り、再送スイープが拾い直す。
///
/// バッチの途中で停止が要求された場合、未処理のイベントは ack しない。
/// それらはブローカー側に保留として残り、同じ購読者名で再起動したときに
/// 読み直される。
pub async fn run_consumer<C>(
    mut consumer: C,
    worker: Arc<DeliveryWorker>,
    poll_interval: Duration,
    mut shutdown: Shutdown,
) where
    C: EventConsumer + 'static,
{
    tracing::info!("コンシューマを開始");
    while !is_shutdown(&shutdown) {
        let batch = match consumer.poll().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "配信イベントの取得に失敗");
                if sleep_or_shutdown(poll_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        if batch.is_empty() {
            if sleep_or_shutdown(poll_interval, &mut shutdown).await {
                break;
            }
            continue;
        }

        for received in batch {
            match worker.handle(&received.event).await {
                Ok(DeliveryOutcome::Skipped(reason)) => {
                    let reason: &'static str = reason.into();
                    tracing::debug!(message.id = %received.event.id, reason, "配信をスキップ");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        message.id = %received.event.id,
                        error = %e,
                        "配信イベントの処理中にストア操作が失敗"
                    );
                }
            }
            if let Err(e) = consumer.ack(&received.delivery_id).await {
                tracing::warn!(
                    delivery_id = %received.delivery_id,
                    error = %e,
                    "配信イベントの ack に失敗"
                );
            }
            if is_shutdown(&shutdown) {
                break;
            }
        }
    }
    tracing::info!("コンシューマを停止");
}

/// `interval` ごとに再送スイープを実行し、停止が要求されるまで続ける
///
/// 最初のスイープは起動から `interval` 後に行う。スイープが間隔より長く
/// かかった場合、取りこぼした回をまとめて実行せず次の間隔を空ける。
pub async fn run_resend_timer(
    scheduler: ResendScheduler,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let kind = scheduler.kind();
    tracing::info!(message.kind = %kind, ?interval, "再送タイマーを開始");

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !is_shutdown(&shutdown) {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = scheduler.sweep().await {
                    tracing::error!(message.kind = %kind, error = %e, "再送スイープに失敗");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!(message.kind = %kind, "再送タイマーを停止");
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use okuri_domain::{
        clock::FixedClock,
        message::{
            DispatchEvent,
            Message,
            MessageId,
            MessageKind,
            MessagePayload,
            NewMessage,
            RetryPolicy,
        },
        notification::SmsMessage,
    };
    use okuri_infra::{
        mock::{
            MockEmailSender,
            MockEventConsumer,
            MockEventPublisher,
            MockMessageRepository,
            MockSmsSender,
        },
        notification::NotificationGateway,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn pending_sms(now: DateTime<Utc>) -> Message {
        Message::new(NewMessage {
            id: MessageId::new(),
            payload: MessagePayload::Sms(SmsMessage {
                phone_number: "+819012345678".to_string(),
                message:      "テスト".to_string(),
            }),
            now,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_コンシューマは受信したイベントを処理してackする() {
        let repo = MockMessageRepository::new();
        let message = pending_sms(t0());
        repo.add_message(message.clone());
        let sms = MockSmsSender::new();
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(repo.clone()),
            NotificationGateway::new(Arc::new(MockEmailSender::new()), Arc::new(sms.clone())),
            Arc::new(FixedClock::new(t0())),
            Duration::from_secs(30),
        ));
        let consumer = MockEventConsumer::new();
        consumer.push_batch(vec![
            DispatchEvent::new(message.id().clone()),
            DispatchEvent::new(MessageId::new()),
        ]);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_consumer(
            consumer.clone(),
            worker,
            Duration::from_millis(500),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(consumer.acked(), vec!["0-1".to_string(), "0-2".to_string()]);
        assert_eq!(sms.sent().len(), 1);
        assert!(repo.get(message.id()).unwrap().is_sent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_停止シグナルで待機中のコンシューマが抜ける() {
        let repo = MockMessageRepository::new();
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(repo),
            NotificationGateway::new(
                Arc::new(MockEmailSender::new()),
                Arc::new(MockSmsSender::new()),
            ),
            Arc::new(FixedClock::new(t0())),
            Duration::from_secs(30),
        ));
        let consumer = MockEventConsumer::new();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_consumer(
            consumer.clone(),
            worker,
            Duration::from_secs(3600),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(consumer.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_バッチ途中で停止したら未処理のイベントはackしない() {
        let repo = MockMessageRepository::new();
        let messages: Vec<Message> = (0..3).map(|_| pending_sms(t0())).collect();
        for message in &messages {
            repo.add_message(message.clone());
        }
        let sms = MockSmsSender::hanging();
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(repo.clone()),
            NotificationGateway::new(Arc::new(MockEmailSender::new()), Arc::new(sms.clone())),
            Arc::new(FixedClock::new(t0())),
            Duration::from_secs(10),
        ));
        let consumer = MockEventConsumer::new();
        consumer.push_batch(
            messages
                .iter()
                .map(|m| DispatchEvent::new(m.id().clone()))
                .collect(),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_consumer(
            consumer.clone(),
            worker,
            Duration::from_millis(500),
            rx,
        ));
        // 1 件目の送信待ちの間に停止を要求する
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.await.unwrap();

        assert_eq!(consumer.acked(), vec!["0-1".to_string()]);
        assert_eq!(sms.attempts(), 1);
        assert!(repo.get(messages[1].id()).unwrap().log().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_再送タイマーは間隔ごとにスイープする() {
        let repo = MockMessageRepository::new();
        let message = pending_sms(t0() - chrono::Duration::seconds(600));
        repo.add_message(message.clone());
        let publisher = MockEventPublisher::new();
        let scheduler = ResendScheduler::new(
            MessageKind::Sms,
            RetryPolicy::new(3, chrono::Duration::seconds(60)),
            Arc::new(repo.clone()),
            Arc::new(publisher.clone()),
            Arc::new(FixedClock::new(t0())),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_resend_timer(scheduler, Duration::from_secs(60), rx));

        // 最初の間隔が経つまではスイープしない
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(publisher.published().is_empty());

        tokio::time::sleep(Duration::from_secs(40)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.published().len(), 1);
        assert_eq!(repo.get(message.id()).unwrap().retried_count(), 1);
    }
}
