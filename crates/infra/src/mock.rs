//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリ実装。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! okuri-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! [`MockMessageRepository`] は各操作をロック内で完結させるため、
//! PostgreSQL 実装の単一文更新と同じく操作単位で原子的に振る舞う。

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use okuri_domain::{
    message::{DispatchEvent, Message, MessageId, MessageKind, MessageQuery},
    notification::{EmailMessage, NotificationError, SmsMessage},
};

use crate::{
    error::InfraError,
    messaging::{EventConsumer, EventPublisher, ReceivedEvent},
    notification::{EmailSender, SmsSender},
    repository::MessageRepository,
};

// ===== MockMessageRepository =====

#[derive(Clone, Default)]
pub struct MockMessageRepository {
    messages:     Arc<Mutex<Vec<Message>>>,
    fail_updates: Arc<AtomicBool>,
}

impl MockMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 任意の状態のメッセージを直接登録する
    pub fn add_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    /// 登録済みメッセージのスナップショット
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id() == id)
            .cloned()
    }

    /// 以後の更新操作（mark_sent / mark_failed / increment_retry）を失敗させる
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn update(&self, id: &MessageId, f: impl FnOnce(&mut Message)) -> Result<(), InfraError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(InfraError::unexpected("mock: 更新失敗"));
        }
        let mut messages = self.messages.lock().unwrap();
        if let Some(message) = messages.iter_mut().find(|m| m.id() == id) {
            f(message);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MockMessageRepository {
    async fn insert(&self, message: &Message) -> Result<MessageId, InfraError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(message.id().clone())
    }

    async fn query(&self, query: &MessageQuery) -> Result<Vec<Message>, InfraError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: &MessageId, now: DateTime<Utc>) -> Result<bool, InfraError> {
        let mut applied = false;
        self.update(id, |m| applied = m.mark_sent(now))?;
        Ok(applied)
    }

    async fn mark_failed(
        &self,
        id: &MessageId,
        entry: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        self.update(id, |m| m.append_failure(entry, now))
    }

    async fn increment_retry(&self, id: &MessageId, now: DateTime<Utc>) -> Result<(), InfraError> {
        self.update(id, |m| m.increment_retry(now))
    }
}

// ===== MockEventPublisher =====

/// 発行されたイベントを記録するモック
#[derive(Clone, Default)]
pub struct MockEventPublisher {
    published:   Arc<Mutex<Vec<(MessageKind, DispatchEvent)>>>,
    failing_ids: Arc<Mutex<HashSet<MessageId>>>,
    fail_all:    Arc<AtomicBool>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// すべての発行を失敗させる
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// 指定 ID の発行だけを失敗させる
    pub fn fail_for(&self, id: MessageId) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    pub fn published(&self) -> Vec<(MessageKind, DispatchEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, kind: MessageKind, event: &DispatchEvent) -> Result<(), InfraError> {
        if self.fail_all.load(Ordering::SeqCst)
            || self.failing_ids.lock().unwrap().contains(&event.id)
        {
            return Err(InfraError::broker("mock: 発行失敗"));
        }
        self.published.lock().unwrap().push((kind, event.clone()));
        Ok(())
    }
}

// ===== MockEventConsumer =====

/// 事前に積んだイベントを順に返すモック
///
/// 空になったら `poll` は空のバッチを返し続ける。
#[derive(Clone, Default)]
pub struct MockEventConsumer {
    batches: Arc<Mutex<VecDeque<Vec<ReceivedEvent>>>>,
    acked:   Arc<Mutex<Vec<String>>>,
    polls:   Arc<AtomicUsize>,
}

impl MockEventConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 回の poll で返すバッチを積む
    pub fn push_batch(&self, events: Vec<DispatchEvent>) {
        let offset = self.batches.lock().unwrap().iter().map(Vec::len).sum::<usize>();
        let batch = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| ReceivedEvent {
                delivery_id: format!("0-{}", offset + i + 1),
                event,
            })
            .collect();
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventConsumer for MockEventConsumer {
    async fn poll(&mut self) -> Result<Vec<ReceivedEvent>, InfraError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<(), InfraError> {
        self.acked.lock().unwrap().push(delivery_id.to_string());
        Ok(())
    }
}

// ===== 送信モック =====

/// 送信モックの振る舞い
#[derive(Clone, Default)]
enum SendBehavior {
    #[default]
    Succeed,
    Fail(String),
    Hang,
}

impl SendBehavior {
    async fn run(&self) -> Result<(), NotificationError> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail(msg) => Err(NotificationError::SendFailed(msg.clone())),
            Self::Hang => std::future::pending().await,
        }
    }
}

/// 送信したメールを記録するモック
#[derive(Clone, Default)]
pub struct MockEmailSender {
    sent:     Arc<Mutex<Vec<EmailMessage>>>,
    attempts: Arc<AtomicUsize>,
    behavior: SendBehavior,
}

impl MockEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 常に `SendFailed(msg)` を返す
    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            behavior: SendBehavior::Fail(msg.into()),
            ..Self::default()
        }
    }

    /// 送信成功したメール
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// 成功・失敗を問わない送信試行回数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.behavior.run().await?;
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// 送信した SMS を記録するモック
#[derive(Clone, Default)]
pub struct MockSmsSender {
    sent:     Arc<Mutex<Vec<SmsMessage>>>,
    attempts: Arc<AtomicUsize>,
    behavior: SendBehavior,
}

impl MockSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 常に `SendFailed(msg)` を返す
    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            behavior: SendBehavior::Fail(msg.into()),
            ..Self::default()
        }
    }

    /// 応答を返さない（タイムアウト検証用）
    pub fn hanging() -> Self {
        Self {
            behavior: SendBehavior::Hang,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmsSender for MockSmsSender {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.behavior.run().await?;
        self.sent.lock().unwrap().push(sms.clone());
        Ok(())
    }
}
