//! 作成 → 配信 → 再送スイープの一連の流れのテスト
//!
//! インメモリのストア・ブローカー・送信手段を組み合わせ、
//! 同じ時刻源を共有するコンポーネントを時間経過込みで検証する。
//!
//! 実行方法:
//! ```bash
//! cargo test -p okuri-dispatcher --test dispatch_flow_test
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use okuri_dispatcher::usecase::{
    DeliveryOutcome,
    DeliveryWorker,
    MessageUseCase,
    ResendScheduler,
    SkipReason,
};
use okuri_domain::{
    clock::ManualClock,
    message::{DispatchEvent, MessageKind, RetryPolicy},
    notification::{EmailMessage, SmsMessage},
};
use okuri_infra::{
    mock::{MockEmailSender, MockEventPublisher, MockMessageRepository, MockSmsSender},
    notification::NotificationGateway,
};
use pretty_assertions::assert_eq;

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn seconds(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

struct Harness {
    clock:     Arc<ManualClock>,
    repo:      MockMessageRepository,
    publisher: MockEventPublisher,
    email:     MockEmailSender,
    sms:       MockSmsSender,
    usecase:   MessageUseCase,
    worker:    DeliveryWorker,
}

impl Harness {
    fn new(email: MockEmailSender, sms: MockSmsSender) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let repo = MockMessageRepository::new();
        let publisher = MockEventPublisher::new();
        let usecase = MessageUseCase::new(
            Arc::new(repo.clone()),
            Arc::new(publisher.clone()),
            clock.clone(),
        );
        let worker = DeliveryWorker::new(
            Arc::new(repo.clone()),
            NotificationGateway::new(Arc::new(email.clone()), Arc::new(sms.clone())),
            clock.clone(),
            Duration::from_secs(30),
        );
        Self {
            clock,
            repo,
            publisher,
            email,
            sms,
            usecase,
            worker,
        }
    }

    fn scheduler(&self, kind: MessageKind) -> ResendScheduler {
        ResendScheduler::new(
            kind,
            RetryPolicy::new(3, seconds(60)),
            Arc::new(self.repo.clone()),
            Arc::new(self.publisher.clone()),
            self.clock.clone(),
        )
    }
}

fn email() -> EmailMessage {
    EmailMessage {
        from:    None,
        tos:     "alice@example.com, bob@example.com".to_string(),
        ccs:     Some("carol@example.com".to_string()),
        bccs:    None,
        subject: "請求書のお知らせ".to_string(),
        body:    "<p>今月の請求書を発行しました</p>".to_string(),
    }
}

fn sms() -> SmsMessage {
    SmsMessage {
        phone_number: "+819012345678".to_string(),
        message:      "認証コード: 123456".to_string(),
    }
}

#[tokio::test]
async fn test_作成したメッセージが配信され送信済みになる() {
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::new());

    let id = h.usecase.create_email(email()).await.unwrap();
    let (kind, dispatch) = h.publisher.published().remove(0);
    h.clock.advance(seconds(1));
    let outcome = h.worker.handle(&dispatch).await.unwrap();

    assert_eq!(kind, MessageKind::Email);
    assert_eq!(outcome, DeliveryOutcome::Sent);
    assert_eq!(h.email.sent(), vec![email()]);
    assert_eq!(h.repo.get(&id).unwrap().sent_at(), Some(t0() + seconds(1)));
}

#[tokio::test]
async fn test_発行が失われたメッセージは猶予経過後のスイープで再発行される() {
    // シナリオ A
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::new());
    h.publisher.fail_all(true);
    let err = h.usecase.create_sms(sms()).await.unwrap_err();
    let id = err.persisted_id().cloned().unwrap();
    h.publisher.fail_all(false);

    h.clock.advance(seconds(61));
    let report = h.scheduler(MessageKind::Sms).sweep().await.unwrap();

    assert_eq!(report.republished, 1);
    assert_eq!(
        h.publisher.published(),
        vec![(MessageKind::Sms, DispatchEvent::new(id.clone()))]
    );
    assert_eq!(h.repo.get(&id).unwrap().retried_count(), 1);
}

#[tokio::test]
async fn test_失敗直後のメッセージは猶予内のスイープでは選ばれない() {
    // シナリオ B
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::failing("boom"));
    let id = h.usecase.create_sms(sms()).await.unwrap();
    let (_, dispatch) = h.publisher.published().remove(0);

    let outcome = h.worker.handle(&dispatch).await.unwrap();
    h.clock.advance(seconds(30));
    let report = h.scheduler(MessageKind::Sms).sweep().await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Failed);
    let stored = h.repo.get(&id).unwrap();
    assert!(stored.log().unwrap().contains("boom"));
    assert_eq!(report.selected, 0);
    assert_eq!(stored.retried_count(), 0);
}

#[tokio::test]
async fn test_送信に失敗し続けると上限回数で再送が止まる() {
    // シナリオ C を含む: retried_count = 2 から最後の再送で 3 に達する
    let h = Harness::new(MockEmailSender::failing("mailbox unavailable"), MockSmsSender::new());
    let scheduler = h.scheduler(MessageKind::Email);
    let id = h.usecase.create_email(email()).await.unwrap();

    let mut sweeps = 0;
    loop {
        let dispatch = h.publisher.published().pop().unwrap().1;
        assert_eq!(h.worker.handle(&dispatch).await.unwrap(), DeliveryOutcome::Failed);

        h.clock.advance(seconds(90));
        let report = scheduler.sweep().await.unwrap();
        if report.selected == 0 {
            break;
        }
        sweeps += 1;
    }

    let stored = h.repo.get(&id).unwrap();
    assert_eq!(sweeps, 3);
    assert_eq!(stored.retried_count(), 3);
    assert_eq!(stored.sent_at(), None);
    // 初回 + 再送 3 回の失敗がすべて順に残る
    assert_eq!(stored.log().unwrap().matches("\n\n").count(), 4);
    assert_eq!(h.email.attempts(), 4);
}

#[tokio::test]
async fn test_送信済みメッセージへの重複イベントは何もしない() {
    // シナリオ D
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::new());
    let id = h.usecase.create_sms(sms()).await.unwrap();
    let (_, dispatch) = h.publisher.published().remove(0);
    h.worker.handle(&dispatch).await.unwrap();
    let after_first = h.repo.get(&id).unwrap();

    h.clock.advance(seconds(5));
    let outcome = h.worker.handle(&dispatch).await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Skipped(SkipReason::AlreadySent));
    assert_eq!(h.sms.attempts(), 1);
    assert_eq!(h.repo.get(&id).unwrap(), after_first);
}

#[tokio::test]
async fn test_対象がなければスイープは0件で何も発行しない() {
    // シナリオ E
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::new());

    for kind in [MessageKind::Email, MessageKind::Sms] {
        let report = h.scheduler(kind).sweep().await.unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(report.republished, 0);
    }
    assert!(h.publisher.published().is_empty());
}

#[tokio::test]
async fn test_種別ごとのスイープは互いのメッセージを拾わない() {
    let h = Harness::new(MockEmailSender::new(), MockSmsSender::new());
    h.publisher.fail_all(true);
    h.usecase.create_email(email()).await.unwrap_err();
    h.usecase.create_sms(sms()).await.unwrap_err();
    h.publisher.fail_all(false);
    h.clock.advance(seconds(120));

    let report = h.scheduler(MessageKind::Email).sweep().await.unwrap();

    assert_eq!(report.republished, 1);
    let kinds: Vec<_> = h.publisher.published().into_iter().map(|(k, _)| k).collect();
    assert_eq!(kinds, vec![MessageKind::Email]);
}
