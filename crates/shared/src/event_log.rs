//! # ビジネスイベントログの構造化ヘルパー
//!
//! メッセージ配信の節目（作成・送信成功・送信失敗・再発行・スイープ）を
//! `jq` で追跡できるよう、ログフィールドの命名規約とヘルパーマクロを提供する。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用する。tracing の
//! `$($field:ident).+` パターンでサポートされ、JSON 出力でフラットなキーになる。
//!
//! 配信失敗の詳細はレコードの `log` カラムにも残る。ここでの出力は
//! 運用上の追跡用であり、状態の正本ではない。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: [`event::category`] の定数
/// - `event.action`: [`event::action`] の定数
/// - `event.result`: [`event::result`] の定数
///
/// ## 推奨フィールド
///
/// - `event.entity_id`: メッセージ ID
/// - `message.kind`: `email` / `sms`
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const MESSAGE: &str = "message";
        pub const RESEND: &str = "resend";
    }

    /// イベントアクション
    pub mod action {
        pub const MESSAGE_CREATED: &str = "message.created";
        pub const MESSAGE_SENT: &str = "message.sent";
        pub const MESSAGE_FAILED: &str = "message.failed";
        pub const MESSAGE_REPUBLISHED: &str = "message.republished";
        pub const RESEND_SWEPT: &str = "resend.swept";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB、ブローカー）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部送信プロバイダ
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const BROKER: &str = "broker";
        pub const DELIVERY: &str = "delivery";
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::fmt::MakeWriter;

    use super::event;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_log_business_eventがbusiness_eventマーカーを付与する() {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(buffer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            crate::log_business_event!(
                event.category = event::category::MESSAGE,
                event.action = event::action::MESSAGE_SENT,
                event.result = event::result::SUCCESS,
                "送信成功"
            );
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains(r#""event.kind":"business_event""#), "{output}");
        assert!(output.contains(r#""event.action":"message.sent""#), "{output}");
    }
}
