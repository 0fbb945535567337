//! # Dispatcher 設定
//!
//! 環境変数から Dispatcher の設定を読み込む。
//!
//! 値の取得は [`DispatcherConfig::from_lookup`] に集約し、
//! テストではプロセス環境を書き換えずに任意の値を渡せるようにしている。

use std::{env, str::FromStr, time::Duration};

use okuri_domain::message::RetryPolicy;
use thiserror::Error;

/// `CONSUMER_NAME` も `HOSTNAME` も無いときの購読者名
///
/// 再起動後も同じ名前で読み直すことで、ack 前に落ちたエントリを取り戻せる。
pub const DEFAULT_CONSUMER_NAME: &str = "okuri-dispatcher";

/// 設定読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// 必須の環境変数が未設定
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    /// 値の形式が不正
    #[error("{name} の値が不正です: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// メール送信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EmailBackend {
    /// SMTP サーバー経由（開発環境の Mailpit など）
    Smtp,
    /// Amazon SES v2 経由
    Ses,
    /// 送信しない（ログ出力のみ）
    Noop,
}

/// SMS 送信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SmsBackend {
    /// HTTP API 経由
    Http,
    /// 送信しない（ログ出力のみ）
    Noop,
}

/// Dispatcher の設定
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// データベース接続 URL
    pub database_url:             String,
    /// 接続プールの最大接続数
    pub database_max_connections: u32,
    /// Redis 接続 URL
    pub redis_url:                String,
    /// 再送スイープ設定
    pub resend:                   ResendConfig,
    /// 1 回の送信に許す最大時間
    pub send_timeout:             Duration,
    /// ストアの 1 文に許す最大時間
    pub statement_timeout:        Duration,
    /// ブローカー購読設定
    pub consumer:                 ConsumerConfig,
    /// メール送信設定
    pub email:                    EmailConfig,
    /// SMS 送信設定
    pub sms:                      SmsConfig,
}

/// 再送スイープの設定
#[derive(Debug, Clone, PartialEq)]
pub struct ResendConfig {
    /// スイープ間隔
    pub interval: Duration,
    /// 再送上限と猶予時間
    pub policy:   RetryPolicy,
}

/// ブローカー購読の設定
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub group:         String,
    pub name:          String,
    pub batch_size:    usize,
    /// 空振り時に次の poll まで待つ時間
    pub poll_interval: Duration,
}

/// メール送信の設定
///
/// `EMAIL_BACKEND` 環境変数で送信バックエンドを切り替える:
/// - `smtp`: SMTP サーバー経由で送信
/// - `ses`: Amazon SES v2 経由で送信
/// - `noop`: 送信しない（ログ出力のみ）
#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub backend:      EmailBackend,
    /// SMTP ホスト（backend=smtp の場合に使用）
    pub smtp_host:    String,
    /// SMTP ポート（backend=smtp の場合に使用）
    pub smtp_port:    u16,
    /// ペイロードに送信元が無い場合の送信元アドレス
    pub from_address: String,
}

/// SMS 送信の設定
#[derive(Debug, Clone, PartialEq)]
pub struct SmsConfig {
    pub backend:      SmsBackend,
    /// 送信 API のエンドポイント（backend=http の場合は必須）
    pub endpoint_url: Option<String>,
    pub api_key:      Option<String>,
    pub from_number:  Option<String>,
}

impl DispatcherConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の取得関数から設定を読み込む
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let max_retries = vars.parse_or("RESEND_MAX_RETRIES", RetryPolicy::DEFAULT_MAX_RETRIES)?;
        let grace = vars.grace_period("RESEND_GRACE_SECS", 60)?;

        let sms = SmsConfig {
            backend:      vars.parse_or("SMS_BACKEND", SmsBackend::Noop)?,
            endpoint_url: vars.get("SMS_ENDPOINT_URL"),
            api_key:      vars.get("SMS_API_KEY"),
            from_number:  vars.get("SMS_FROM_NUMBER"),
        };
        if sms.backend == SmsBackend::Http && sms.endpoint_url.is_none() {
            return Err(ConfigError::Missing("SMS_ENDPOINT_URL"));
        }

        Ok(Self {
            database_url: vars.require("DATABASE_URL")?,
            database_max_connections: vars.positive("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: vars.require("REDIS_URL")?,
            resend: ResendConfig {
                interval: Duration::from_secs(vars.positive("RESEND_INTERVAL_SECS", 60)?),
                policy:   RetryPolicy::new(max_retries, grace),
            },
            send_timeout: Duration::from_secs(vars.positive("SEND_TIMEOUT_SECS", 30)?),
            statement_timeout: Duration::from_secs(
                vars.positive("DATABASE_STATEMENT_TIMEOUT_SECS", 30)?,
            ),
            consumer: ConsumerConfig {
                group:         vars
                    .get("CONSUMER_GROUP")
                    .unwrap_or_else(|| "okuri-dispatcher".to_string()),
                name:          vars
                    .get("CONSUMER_NAME")
                    .or_else(|| vars.get("HOSTNAME"))
                    .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_string()),
                batch_size:    vars.positive("CONSUMER_BATCH_SIZE", 16)?,
                poll_interval: Duration::from_millis(
                    vars.positive("CONSUMER_POLL_INTERVAL_MS", 500)?,
                ),
            },
            email: EmailConfig {
                backend:      vars.parse_or("EMAIL_BACKEND", EmailBackend::Noop)?,
                smtp_host:    vars.get("SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
                smtp_port:    vars.parse_or("SMTP_PORT", 1025)?,
                from_address: vars
                    .get("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|| "noreply@okuri.example.com".to_string()),
            },
            sms,
        })
    }
}

/// 環境変数の取得ヘルパー
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// 値を取得する。空文字列は未設定として扱う
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    /// 1 以上の整数。0 はタイマーや待ち時間として意味を持たないので弾く
    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + From<u8>,
    {
        let value = self.parse_or(name, default)?;
        if value == T::from(0) {
            return Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
            });
        }
        Ok(value)
    }

    /// 0 以上の秒数を `chrono::Duration` として読む
    fn grace_period(&self, name: &'static str, default: u32) -> Result<chrono::Duration, ConfigError> {
        let Some(value) = self.get(name) else {
            return Ok(chrono::Duration::seconds(i64::from(default)));
        };
        value
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
            .ok_or(ConfigError::Invalid { name, value })
    }
}
