//! # メッセージ作成
//!
//! ペイロードを検証して保存し、種別ごとのトピックに配信イベントを発行する。
//!
//! 発行に失敗してもレコードは残る。未送信のまま猶予時間を過ぎれば
//! 再送スイープが拾って再発行するため、呼び出し元はエラーを受け取っても
//! 作成をやり直す必要はない。

use std::sync::Arc;

use okuri_domain::{
    clock::Clock,
    message::{DispatchEvent, Message, MessageId, MessagePayload, NewMessage},
    notification::{EmailMessage, SmsMessage},
};
use okuri_infra::{messaging::EventPublisher, repository::MessageRepository};
use okuri_shared::{event_log::event, log_business_event};

use crate::error::DispatchError;

/// メッセージ作成ユースケース
pub struct MessageUseCase {
    repo:      Arc<dyn MessageRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock:     Arc<dyn Clock>,
}

impl MessageUseCase {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            publisher,
            clock,
        }
    }

    /// メールを作成して配信を依頼する
    pub async fn create_email(&self, email: EmailMessage) -> Result<MessageId, DispatchError> {
        self.create(MessagePayload::Email(email)).await
    }

    /// SMS を作成して配信を依頼する
    pub async fn create_sms(&self, sms: SmsMessage) -> Result<MessageId, DispatchError> {
        self.create(MessagePayload::Sms(sms)).await
    }

    async fn create(&self, payload: MessagePayload) -> Result<MessageId, DispatchError> {
        payload.validate()?;

        let message = Message::new(NewMessage {
            id: MessageId::new(),
            payload,
            now: self.clock.now(),
        });
        let kind = message.kind();

        let id = self
            .repo
            .insert(&message)
            .await
            .map_err(DispatchError::Store)?;

        if let Err(source) = self
            .publisher
            .publish(kind, &DispatchEvent::new(id.clone()))
            .await
        {
            log_business_event!(
                event.category = event::category::MESSAGE,
                event.action = event::action::MESSAGE_CREATED,
                event.entity_id = %id,
                event.result = event::result::FAILURE,
                message.kind = %kind,
                error = %source,
                "メッセージを保存したが配信イベントの発行に失敗"
            );
            return Err(DispatchError::Publish { id, source });
        }

        log_business_event!(
            event.category = event::category::MESSAGE,
            event.action = event::action::MESSAGE_CREATED,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            message.kind = %kind,
            "メッセージを作成"
        );
        Ok(id)
    }
}
