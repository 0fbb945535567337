//! # 通知
//!
//! 送信ペイロード（メール / SMS）と送信エラーを定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 |
//! |---|------------|
//! | [`EmailMessage`] | メール送信内容 |
//! | [`SmsMessage`] | SMS 送信内容 |
//! | [`NotificationError`] | 配信エラー（一時的・恒久的の区別はしない） |
//!
//! 宛先リスト（`tos` / `ccs` / `bccs`）はカンマまたはセミコロン区切りの
//! 1 つの文字列として保持し、送信時に [`split_addresses`] で分解する。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DomainError, message::MessageKind};

/// 通知送信エラー
#[derive(Debug, Error)]
pub enum NotificationError {
    /// 送信に失敗
    #[error("送信に失敗: {0}")]
    SendFailed(String),

    /// 送信がタイムアウト
    #[error("送信がタイムアウト: {0:?}")]
    Timeout(Duration),
}

/// メールメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// 送信元アドレス（未指定なら送信バックエンドの既定値）
    pub from:    Option<String>,
    /// 宛先（区切り文字付きリスト）
    pub tos:     String,
    /// CC（区切り文字付きリスト）
    #[serde(default)]
    pub ccs:     Option<String>,
    /// BCC（区切り文字付きリスト）
    #[serde(default)]
    pub bccs:    Option<String>,
    /// 件名
    pub subject: String,
    /// HTML 本文
    pub body:    String,
}

impl EmailMessage {
    /// 送信可能な形かを検証する
    pub fn validate(&self) -> Result<(), DomainError> {
        if split_addresses(&self.tos).next().is_none() {
            return Err(DomainError::missing(MessageKind::Email, "tos"));
        }
        if self.subject.trim().is_empty() {
            return Err(DomainError::missing(MessageKind::Email, "subject"));
        }
        Ok(())
    }

    pub fn to_addresses(&self) -> impl Iterator<Item = &str> {
        split_addresses(&self.tos)
    }

    pub fn cc_addresses(&self) -> impl Iterator<Item = &str> {
        split_addresses(self.ccs.as_deref().unwrap_or_default())
    }

    pub fn bcc_addresses(&self) -> impl Iterator<Item = &str> {
        split_addresses(self.bccs.as_deref().unwrap_or_default())
    }
}

/// SMS メッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    /// 宛先電話番号
    pub phone_number: String,
    /// 本文
    pub message:      String,
}

impl SmsMessage {
    /// 送信可能な形かを検証する
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.phone_number.trim().is_empty() {
            return Err(DomainError::missing(MessageKind::Sms, "phone_number"));
        }
        if self.message.trim().is_empty() {
            return Err(DomainError::missing(MessageKind::Sms, "message"));
        }
        Ok(())
    }
}

/// 区切り文字（`,` / `;`）付きのアドレスリストを分解する
///
/// 前後の空白を取り除き、空要素は捨てる。
pub fn split_addresses(list: &str) -> impl Iterator<Item = &str> {
    list.split([',', ';']).map(str::trim).filter(|s| !s.is_empty())
}
