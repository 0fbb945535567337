//! Amazon SES v2 によるメール送信
//!
//! `EMAIL_BACKEND=ses` のとき使う。リージョンと認証情報は AWS SDK の
//! 標準の探索順（環境変数・プロファイル・インスタンスロール）で決まる。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    types::{Body, Content, Destination, EmailContent, Message},
};
use okuri_domain::notification::{EmailMessage, NotificationError};

use super::EmailSender;

pub async fn create_ses_client() -> Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    Client::new(&config)
}

pub struct SesEmailSender {
    client:       Client,
    from_address: String,
}

impl SesEmailSender {
    /// `from_address` は SES で検証済みのアドレスであること
    pub fn new(client: Client, from_address: String) -> Self {
        Self {
            client,
            from_address,
        }
    }
}

/// 空のリストは `None` にする（SES は空配列を受け付けない）
fn owned_list<'a>(addresses: impl Iterator<Item = &'a str>) -> Option<Vec<String>> {
    let list: Vec<String> = addresses.map(str::to_string).collect();
    (!list.is_empty()).then_some(list)
}

#[async_trait]
impl EmailSender for SesEmailSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError> {
        let destination = Destination::builder()
            .set_to_addresses(owned_list(email.to_addresses()))
            .set_cc_addresses(owned_list(email.cc_addresses()))
            .set_bcc_addresses(owned_list(email.bcc_addresses()))
            .build();

        let subject = Content::builder()
            .data(&email.subject)
            .build()
            .map_err(|e| NotificationError::SendFailed(format!("件名構築失敗: {e}")))?;
        let html = Content::builder()
            .data(&email.body)
            .build()
            .map_err(|e| NotificationError::SendFailed(format!("HTML 本文構築失敗: {e}")))?;

        let content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(subject)
                    .body(Body::builder().html(html).build())
                    .build(),
            )
            .build();

        self.client
            .send_email()
            .from_email_address(email.from.as_deref().unwrap_or(&self.from_address))
            .destination(destination)
            .content(content)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("SES 送信失敗: {e}")))?;

        Ok(())
    }
}
