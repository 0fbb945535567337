//! # Dispatcher
//!
//! メール・SMS の配信を担当するバックグラウンドプロセス。
//!
//! ## 役割
//!
//! - **配信**: 種別ごとの Redis Stream から配信イベントを受け取り、送信結果を記録する
//! - **再送**: 一定間隔で未送信メッセージを探し、配信イベントを再発行する
//!
//! ```text
//! ┌──────────┐ XADD  ┌──────────────────────┐ XREADGROUP ┌────────────────┐
//! │ 作成元   │──────→│ okuri:dispatch:{kind}│───────────→│ DeliveryWorker │──→ SMTP / SES / SMS API
//! └──────────┘       └──────────────────────┘            └────────────────┘
//!      │                       ↑                                 │
//!      ↓                       │ 再発行                          ↓
//! ┌──────────┐  未送信を検索  ┌─────────────────┐        ┌────────────┐
//! │ messages │←──────────────│ ResendScheduler │        │  messages  │
//! └──────────┘               └─────────────────┘        └────────────┘
//! ```
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `DATABASE_MAX_CONNECTIONS` | No | 接続プールの最大接続数（デフォルト: 10） |
//! | `DATABASE_STATEMENT_TIMEOUT_SECS` | No | ストア操作 1 文の実行時間上限（デフォルト: 30） |
//! | `REDIS_URL` | **Yes** | Redis 接続 URL |
//! | `RESEND_INTERVAL_SECS` | No | 再送スイープ間隔（デフォルト: 60） |
//! | `RESEND_GRACE_SECS` | No | 再送までの猶予時間（デフォルト: 60） |
//! | `RESEND_MAX_RETRIES` | No | 再送回数の上限（デフォルト: 3） |
//! | `SEND_TIMEOUT_SECS` | No | 1 回の送信のタイムアウト（デフォルト: 30） |
//! | `CONSUMER_GROUP` | No | コンシューマーグループ名（デフォルト: `okuri-dispatcher`） |
//! | `CONSUMER_NAME` | No | グループ内の購読者名（デフォルト: `HOSTNAME`、無ければ `okuri-dispatcher`） |
//! | `CONSUMER_BATCH_SIZE` | No | 1 回に取り出す最大件数（デフォルト: 16） |
//! | `CONSUMER_POLL_INTERVAL_MS` | No | 空振り時の待機時間（デフォルト: 500） |
//! | `EMAIL_BACKEND` | No | `smtp` / `ses` / `noop`（デフォルト: `noop`） |
//! | `SMS_BACKEND` | No | `http` / `noop`（デフォルト: `noop`） |
//! | `LOG_FORMAT` | No | `json` / `pretty` |
//!
//! ## 起動方法
//!
//! ```bash
//! DATABASE_URL=postgres://... REDIS_URL=redis://... cargo run -p okuri-dispatcher
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use okuri_dispatcher::{
    config::DispatcherConfig,
    gateway::build_gateway,
    runner::{run_consumer, run_resend_timer},
    usecase::{DeliveryWorker, ResendScheduler},
};
use okuri_domain::{
    clock::{Clock, SystemClock},
    message::MessageKind,
};
use okuri_infra::{
    db,
    messaging::{EventPublisher, RedisStreamConsumer, RedisStreamPublisher},
    redis,
    repository::{MessageRepository, PostgresMessageRepository},
};
use okuri_shared::observability::{TracingConfig, init_tracing};
use strum::IntoEnumIterator;
use tokio::{sync::watch, task::JoinSet};
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    let app_span = init_tracing(TracingConfig::from_env("okuri-dispatcher"))?;
    run().instrument(app_span).await
}

async fn run() -> anyhow::Result<()> {
    let config = DispatcherConfig::from_env().context("設定の読み込みに失敗しました")?;

    let pool = db::create_pool(
        &config.database_url,
        config.database_max_connections,
        config.statement_timeout,
    )
    .await
    .context("データベース接続に失敗しました")?;
    db::run_migrations(&pool)
        .await
        .context("マイグレーションの適用に失敗しました")?;
    tracing::info!("データベースに接続しました");

    let conn = redis::create_connection_manager(&config.redis_url)
        .await
        .context("Redis 接続に失敗しました")?;
    tracing::info!("Redis に接続しました");

    // 依存コンポーネントを初期化
    let repo: Arc<dyn MessageRepository> = Arc::new(PostgresMessageRepository::new(pool));
    let publisher: Arc<dyn EventPublisher> = Arc::new(RedisStreamPublisher::new(conn.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = build_gateway(&config.email, &config.sms).await?;
    let worker = Arc::new(DeliveryWorker::new(
        repo.clone(),
        gateway,
        clock.clone(),
        config.send_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // 種別ごとにコンシューマと再送タイマーを起動
    for kind in MessageKind::iter() {
        let consumer = RedisStreamConsumer::connect(
            conn.clone(),
            kind,
            &config.consumer.group,
            &config.consumer.name,
            config.consumer.batch_size,
        )
        .await
        .with_context(|| format!("{kind} のコンシューマーグループ作成に失敗しました"))?;
        tasks.spawn(
            run_consumer(
                consumer,
                worker.clone(),
                config.consumer.poll_interval,
                shutdown_rx.clone(),
            )
            .in_current_span(),
        );

        let scheduler = ResendScheduler::new(
            kind,
            config.resend.policy,
            repo.clone(),
            publisher.clone(),
            clock.clone(),
        );
        tasks.spawn(
            run_resend_timer(scheduler, config.resend.interval, shutdown_rx.clone())
                .in_current_span(),
        );
    }

    tracing::info!(
        consumer.group = %config.consumer.group,
        consumer.name = %config.consumer.name,
        "Dispatcher を起動しました"
    );

    tokio::signal::ctrl_c()
        .await
        .context("シグナルの待ち受けに失敗しました")?;
    tracing::info!("停止シグナルを受信しました。処理中のイベントを終えて停止します");
    shutdown_tx.send_replace(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "タスクが異常終了しました");
        }
    }
    tracing::info!("Dispatcher を停止しました");
    Ok(())
}
