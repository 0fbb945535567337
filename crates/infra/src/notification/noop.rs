//! 送信しないバックエンド
//!
//! `EMAIL_BACKEND=noop` / `SMS_BACKEND=noop` のとき使う。宛先と件名を
//! ログに残して成功を返すので、ローカルでも配信フロー全体を通せる。

use async_trait::async_trait;
use okuri_domain::notification::{EmailMessage, NotificationError, SmsMessage};

use super::{EmailSender, SmsSender};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError> {
        tracing::info!(
            recipients = email.to_addresses().count(),
            cc = email.cc_addresses().count(),
            bcc = email.bcc_addresses().count(),
            subject = %email.subject,
            "メール送信を省略 (noop)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSmsSender;

#[async_trait]
impl SmsSender for NoopSmsSender {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<(), NotificationError> {
        tracing::info!(
            phone_number = %sms.phone_number,
            chars = sms.message.chars().count(),
            "SMS 送信を省略 (noop)"
        );
        Ok(())
    }
}
