//! テスト共通フィクスチャ
//!
//! DB を使用する統合テストで共通利用するメッセージ生成ヘルパー。

// 各テストファイルが独立したクレートとしてコンパイルされるため、
// 使用しない関数に dead_code 警告が出る。モジュール全体で抑制する。
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use okuri_domain::{
    message::{Message, MessageId, MessagePayload, NewMessage},
    notification::{EmailMessage, SmsMessage},
};

/// テスト用の固定日時
pub fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn email_payload() -> MessagePayload {
    MessagePayload::Email(EmailMessage {
        from:    None,
        tos:     "alice@example.com;bob@example.com".to_string(),
        ccs:     None,
        bccs:    None,
        subject: "テスト件名".to_string(),
        body:    "<p>テスト本文</p>".to_string(),
    })
}

pub fn sms_payload() -> MessagePayload {
    MessagePayload::Sms(SmsMessage {
        phone_number: "+819012345678".to_string(),
        message:      "テスト SMS".to_string(),
    })
}

/// 指定時刻に作成された未送信メッセージ
pub fn create_test_message(payload: MessagePayload, now: DateTime<Utc>) -> Message {
    Message::new(NewMessage {
        id: MessageId::new(),
        payload,
        now,
    })
}
