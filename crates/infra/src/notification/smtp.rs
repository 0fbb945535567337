//! SMTP 経由のメール送信
//!
//! `EMAIL_BACKEND=smtp` のとき使う。宛先リストを分解して 1 通の HTML メールに
//! 組み立て、lettre の非同期トランスポートで送る。

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{Mailbox, Message, header::ContentType},
};
use okuri_domain::notification::{EmailMessage, NotificationError};

use super::EmailSender;

pub struct SmtpEmailSender {
    transport:    AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpEmailSender {
    /// `from_address` はペイロードに送信元が無いときに使う。
    pub fn new(host: &str, port: u16, from_address: String) -> Self {
        // TLS なし。中継サーバーがローカルにある前提
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self {
            transport,
            from_address,
        }
    }

    /// 宛先・CC・BCC のどれか 1 つでも解釈できなければ送信失敗とする
    fn build_message(&self, email: &EmailMessage) -> Result<Message, NotificationError> {
        let from = email.from.as_deref().unwrap_or(&self.from_address);
        let mut builder = Message::builder()
            .from(parse_mailbox(from, "送信元")?)
            .subject(&email.subject);

        for to in email.to_addresses() {
            builder = builder.to(parse_mailbox(to, "宛先")?);
        }
        for cc in email.cc_addresses() {
            builder = builder.cc(parse_mailbox(cc, "CC")?);
        }
        for bcc in email.bcc_addresses() {
            builder = builder.bcc(parse_mailbox(bcc, "BCC")?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())
            .map_err(|e| NotificationError::SendFailed(format!("メッセージ構築失敗: {e}")))
    }
}

fn parse_mailbox(address: &str, label: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|e| NotificationError::SendFailed(format!("{label}アドレス不正 ({address}): {e}")))
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError> {
        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::SendFailed(format!("SMTP 送信失敗: {e}")))?;

        Ok(())
    }
}
