//! Redis-backed channel state store

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::info;

use super::{ChannelState, ChannelStateStore, StoreError, record};
use crate::constants::state::REDIS_KEY_PREFIX;
use crate::metrics::StoreOp;

/// Extra connection attempts before a reconnect gives up until the next command
const RECONNECT_RETRIES: usize = 1;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Store keeping state as JSON strings with server-side expiry
///
/// Uses a multiplexed [`ConnectionManager`], which reconnects on its own and
/// is cheap to clone per operation. Every command and every connection attempt
/// is bounded, so a stalled server surfaces as [`StoreError::Backend`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Build a `redis://` URL from connection parts
#[must_use]
pub fn connection_url(host: &str, port: u16, password: Option<&str>, db: i64) -> String {
    match password.filter(|p| !p.is_empty()) {
        Some(pw) => format!(
            "redis://:{}@{}:{}/{}",
            urlencoding::encode(pw),
            host,
            port,
            db
        ),
        None => format!("redis://{}:{}/{}", host, port, db),
    }
}

impl RedisStore {
    /// Connect and verify the server answers within `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout)
            .set_number_of_retries(RECONNECT_RETRIES)
            .set_max_delay(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        let conn = ConnectionManager::new_with_config(client, config).await?;
        let store = Self {
            conn,
            prefix: REDIS_KEY_PREFIX.to_string(),
        };
        store.ping().await?;
        info!(prefix = %store.prefix, ?timeout, "Connected to Redis state store");
        Ok(store)
    }

    #[inline]
    fn key(&self, channel_id: &str) -> String {
        format!("{}{}", self.prefix, channel_id)
    }
}

/// `SET ... EX` rejects zero, and sub-second TTLs round up
#[inline]
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl ChannelStateStore for RedisStore {
    async fn get(&self, channel_id: &str) -> Result<ChannelState, StoreError> {
        let mut conn = self.conn.clone();
        let result: Result<ChannelState, StoreError> = async {
            let raw: Option<String> = conn.get(self.key(channel_id)).await?;
            let raw = raw.ok_or(StoreError::NotFound)?;
            Ok(serde_json::from_str(&raw)?)
        }
        .await;
        record(StoreOp::Get, &result);
        result
    }

    async fn set(
        &self,
        channel_id: &str,
        state: ChannelState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let result: Result<(), StoreError> = async {
            let json = serde_json::to_string(&state)?;
            let () = conn
                .set_ex(self.key(channel_id), json, ttl_seconds(ttl))
                .await?;
            Ok(())
        }
        .await;
        record(StoreOp::Set, &result);
        result
    }

    async fn delete(&self, channel_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let result: Result<(), StoreError> = async {
            let _removed: u64 = conn.del(self.key(channel_id)).await?;
            Ok(())
        }
        .await;
        record(StoreOp::Delete, &result);
        result
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        // The connection manager closes when the last clone drops
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_rounding() {
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_secs(86_400)), 86_400);
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        // Accepts connections and never replies
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let begun = std::time::Instant::now();
        let url = connection_url("127.0.0.1", port, None, 0);
        let err = RedisStore::connect(&url, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Backend(_)), "{err:?}");
        assert!(begun.elapsed() < Duration::from_secs(20));
        server.abort();
    }

    #[test]
    fn test_connection_url() {
        assert_eq!(
            connection_url("localhost", 6379, None, 0),
            "redis://localhost:6379/0"
        );
        assert_eq!(
            connection_url("cache", 6380, Some("p@ss"), 2),
            "redis://:p%40ss@cache:6380/2"
        );
        assert_eq!(
            connection_url("cache", 6379, Some(""), 0),
            "redis://cache:6379/0"
        );
    }
}
