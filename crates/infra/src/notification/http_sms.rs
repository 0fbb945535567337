//! HTTP SMS 送信実装
//!
//! SMS プロバイダの HTTP API に JSON で送信依頼を POST する。
//! 2xx 以外の応答は送信失敗として扱う。

use async_trait::async_trait;
use okuri_domain::notification::{NotificationError, SmsMessage};
use serde::Serialize;

use super::SmsSender;

/// プロバイダへのリクエスト本文
#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to:   &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    body: &'a str,
}

/// HTTP SMS 送信
pub struct HttpSmsSender {
    client:      reqwest::Client,
    endpoint:    String,
    api_key:     Option<String>,
    from_number: Option<String>,
}

impl HttpSmsSender {
    /// # 引数
    ///
    /// - `endpoint`: 送信 API の URL
    /// - `api_key`: 設定されていれば Bearer トークンとして付与する
    /// - `from_number`: 送信元番号（プロバイダ既定を使う場合は `None`）
    pub fn new(endpoint: String, api_key: Option<String>, from_number: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            from_number,
        }
    }

    fn request_body<'a>(&'a self, sms: &'a SmsMessage) -> SmsRequest<'a> {
        SmsRequest {
            to:   &sms.phone_number,
            from: self.from_number.as_deref(),
            body: &sms.message,
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.endpoint).json(&self.request_body(sms));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        request
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("SMS 送信失敗: {e}")))?
            .error_for_status()
            .map_err(|e| NotificationError::SendFailed(format!("SMS プロバイダがエラーを返却: {e}")))?;

        Ok(())
    }
}
