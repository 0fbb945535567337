//! # ログ出力の初期化
//!
//! Dispatcher の各ループが出すログを 1 つの subscriber にまとめる。
//!
//! - `LOG_FORMAT=json`: 1 行 1 イベントの JSON（集約基盤向け）
//! - `LOG_FORMAT=pretty` または未設定: 端末向けの整形出力
//! - `RUST_LOG`: フィルタ。未設定なら [`TracingConfig::default_filter`]

/// 既定のログフィルタ
pub const DEFAULT_FILTER: &str = "info,okuri=debug";

/// ログ出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// 大文字小文字と前後の空白を無視して解釈する。未知の値は `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// `LOG_FORMAT` から読み取る
    ///
    /// 未知の値は Pretty にして stderr に知らせる。subscriber を作る前なので
    /// tracing では出せない。
    pub fn from_env() -> Self {
        let Ok(raw) = std::env::var("LOG_FORMAT") else {
            return Self::default();
        };
        Self::parse(&raw).unwrap_or_else(|| {
            eprintln!("LOG_FORMAT={raw:?} は解釈できないため pretty で出力します");
            Self::default()
        })
    }
}

/// トレーシング初期化設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// ルートスパンの `service` フィールド
    pub service_name:   String,
    pub log_format:     LogFormat,
    /// `RUST_LOG` が無いときのフィルタ
    pub default_filter: String,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>, log_format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            log_format,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }

    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self::new(service_name, LogFormat::from_env())
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}

/// グローバル subscriber を登録し、`service` 付きのルートスパンを返す
///
/// `tracing_error::ErrorLayer` も登録するので、`InfraError` は生成時点の
/// `SpanTrace`（どのメッセージのどの操作か）を持てる。
/// 既に subscriber が登録済みならエラーを返す。
#[cfg(feature = "observability")]
pub fn init_tracing(
    config: TracingConfig,
) -> Result<tracing::Span, tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{EnvFilter, Layer as _, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;

    Ok(tracing::info_span!("app", service = %config.service_name))
}
