//! # Redis 接続管理
//!
//! 配信イベントのブローカーとして使う Redis への接続を管理する。
//!
//! `ConnectionManager` は切断時に自動で再接続し、クローンして複数タスクから
//! 共有できる。発行側（作成ユースケース・再送スイープ）と購読側（ワーカー）は
//! それぞれクローンを持つ。

use redis::{Client, aio::ConnectionManager};

/// Redis 接続マネージャを作成する
///
/// # 引数
///
/// * `redis_url` - `redis://[[username:]password@]host[:port][/database]`
///   （TLS は `rediss://`）
pub async fn create_connection_manager(
    redis_url: &str,
) -> Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(redis_url)?;
    ConnectionManager::new(client).await
}
