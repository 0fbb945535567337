//! # 送信ゲートウェイ
//!
//! メール・SMS の外部送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: メールは [`EmailSender`]、SMS は [`SmsSender`]
//! - **ペイロード種別で振り分け**: [`NotificationGateway`] がペイロードの
//!   バリアントを見て対応する送信手段を呼ぶ
//! - **環境変数切替**: `EMAIL_BACKEND`（smtp / ses / noop）と
//!   `SMS_BACKEND`（http / noop）でランタイム選択
//!
//! 送信はストアに副作用を持たない。同じメッセージに対して複数回
//! 呼ばれうるため、重複送信の許容は受信側の前提とする。

mod http_sms;
mod noop;
mod ses;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
pub use http_sms::HttpSmsSender;
pub use noop::{NoopEmailSender, NoopSmsSender};
use okuri_domain::{
    message::MessagePayload,
    notification::{EmailMessage, NotificationError, SmsMessage},
};
pub use ses::{SesEmailSender, create_ses_client};
pub use smtp::SmtpEmailSender;

/// メール送信トレイト
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError>;
}

/// SMS 送信トレイト
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<(), NotificationError>;
}

/// 送信ゲートウェイ
///
/// メール・SMS の送信手段を束ね、ペイロードの種別に応じて振り分ける。
#[derive(Clone)]
pub struct NotificationGateway {
    email: Arc<dyn EmailSender>,
    sms:   Arc<dyn SmsSender>,
}

impl NotificationGateway {
    pub fn new(email: Arc<dyn EmailSender>, sms: Arc<dyn SmsSender>) -> Self {
        Self { email, sms }
    }

    /// ペイロードを送信する
    pub async fn send(&self, payload: &MessagePayload) -> Result<(), NotificationError> {
        match payload {
            MessagePayload::Email(email) => self.email.send_email(email).await,
            MessagePayload::Sms(sms) => self.sms.send_sms(sms).await,
        }
    }
}
