//! # PostgreSQL 接続
//!
//! messages テーブルへの接続プールとスキーマ適用。
//!
//! コンシューマループ（種別ごと）と再送スイープ（種別ごと）が同じプールを
//! 共有する。ストア操作はどれも 1 文で終わるので、プールの大きさは
//! 同時に走るループ数と 1 バッチ内の処理を目安に決めればよい。
//!
//! 各接続には `statement_timeout` を設定する。応答しない文があっても
//! サーバー側で打ち切られ、呼び出し元には `InfraError` として返る。

use std::{str::FromStr, time::Duration};

use sqlx::{
    PgPool,
    migrate::MigrateError,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// 接続取得を待つ上限
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// `migrations/` のスキーマを適用する
///
/// 適用済みのものは飛ばす。複数の Dispatcher が同時に起動しても、
/// sqlx が advisory lock で直列化する。
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// 接続オプションに文ごとの実行時間上限を加える
pub fn with_statement_timeout(options: PgConnectOptions, timeout: Duration) -> PgConnectOptions {
    // 単位無しの値はミリ秒として解釈される
    options.options([("statement_timeout", timeout.as_millis().to_string())])
}

/// 接続プールを作る
///
/// 接続できなければその場でエラーを返す（起動時に DB 設定の誤りに気づける）。
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    statement_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    let options = with_statement_timeout(PgConnectOptions::from_str(database_url)?, statement_timeout);
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
}
