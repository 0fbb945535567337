//! # 送信ゲートウェイの組み立て
//!
//! 設定で選ばれたバックエンドからメール・SMS の送信手段を作り、
//! [`NotificationGateway`] に束ねる。

use std::sync::Arc;

use okuri_infra::notification::{
    EmailSender,
    HttpSmsSender,
    NoopEmailSender,
    NoopSmsSender,
    NotificationGateway,
    SesEmailSender,
    SmsSender,
    SmtpEmailSender,
    create_ses_client,
};

use crate::config::{ConfigError, EmailBackend, EmailConfig, SmsBackend, SmsConfig};

/// 設定からゲートウェイを作る
pub async fn build_gateway(
    email: &EmailConfig,
    sms: &SmsConfig,
) -> Result<NotificationGateway, ConfigError> {
    Ok(NotificationGateway::new(
        build_email_sender(email).await,
        build_sms_sender(sms)?,
    ))
}

async fn build_email_sender(config: &EmailConfig) -> Arc<dyn EmailSender> {
    tracing::info!(backend = %config.backend, "メール送信バックエンドを初期化");
    match config.backend {
        EmailBackend::Smtp => Arc::new(SmtpEmailSender::new(
            &config.smtp_host,
            config.smtp_port,
            config.from_address.clone(),
        )),
        EmailBackend::Ses => Arc::new(SesEmailSender::new(
            create_ses_client().await,
            config.from_address.clone(),
        )),
        EmailBackend::Noop => Arc::new(NoopEmailSender),
    }
}

fn build_sms_sender(config: &SmsConfig) -> Result<Arc<dyn SmsSender>, ConfigError> {
    tracing::info!(backend = %config.backend, "SMS 送信バックエンドを初期化");
    let sender: Arc<dyn SmsSender> = match config.backend {
        SmsBackend::Http => {
            let endpoint = config
                .endpoint_url
                .clone()
                .ok_or(ConfigError::Missing("SMS_ENDPOINT_URL"))?;
            Arc::new(HttpSmsSender::new(
                endpoint,
                config.api_key.clone(),
                config.from_number.clone(),
            ))
        }
        SmsBackend::Noop => Arc::new(NoopSmsSender),
    };
    Ok(sender)
}
