//! Redis-backed cache store.
//!
//! Values are stored as plain strings with `SET .. EX`. Pattern deletes walk
//! the key space with `SCAN .. MATCH .. COUNT` and remove each batch with one
//! `DEL`, so no single command blocks the server for the whole key space.

use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use tracing::{debug, info};

use super::lock::{rw_read, rw_write};
use super::store::{CacheStore, StoreError};

const SOURCE: &str = "cache::redis";

#[derive(Debug, Clone, Copy)]
pub struct RedisOptions {
    pub scan_batch_size: NonZeroUsize,
    /// Upper bound on any single command round trip.
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
}

pub struct RedisStore {
    connection: RwLock<Option<MultiplexedConnection>>,
    options: RedisOptions,
}

impl RedisStore {
    /// Open a multiplexed connection and verify it with `PING`.
    pub async fn connect(url: &str, options: RedisOptions) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|err| StoreError::backend("open", err))?;
        let connection = tokio::time::timeout(
            options.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            StoreError::unavailable(format!(
                "connect to redis timed out after {:?}",
                options.connect_timeout
            ))
        })?
        .map_err(|err| classify("connect", err))?;

        let store = Self {
            connection: RwLock::new(Some(connection)),
            options,
        };
        store.ping().await?;
        info!(
            scan_batch_size = options.scan_batch_size.get(),
            operation_timeout_ms = options.operation_timeout.as_millis() as u64,
            "Connected to redis cache"
        );
        Ok(store)
    }

    fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        rw_read(&self.connection, SOURCE, "connection")
            .clone()
            .ok_or_else(|| StoreError::unavailable("redis connection closed"))
    }

    async fn run<T: FromRedisValue>(&self, op: &'static str, cmd: &Cmd) -> Result<T, StoreError> {
        let mut connection = self.connection()?;
        let reply = cmd.query_async::<T>(&mut connection);
        match tokio::time::timeout(self.options.operation_timeout, reply).await {
            Ok(result) => result.map_err(|err| classify(op, err)),
            Err(_) => Err(StoreError::unavailable(format!(
                "redis {op} timed out after {:?}",
                self.options.operation_timeout
            ))),
        }
    }
}

/// Transport failures mean "unavailable"; anything the server answered with
/// is a backend error.
fn classify(op: &'static str, err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::unavailable(format!("redis {op}: {err}"))
    } else {
        StoreError::backend(op, err)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run("get", redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: NonZeroU64) -> Result<(), StoreError> {
        self.run(
            "set",
            redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs.get()),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.run("delete", redis::cmd("DEL").arg(key)).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut cursor = 0_u64;
        let mut total = 0_u64;
        let mut batches = 0_u32;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(self.options.scan_batch_size.get()),
                )
                .await?;
            if !keys.is_empty() {
                total += self
                    .run::<u64>("delete_by_pattern", redis::cmd("DEL").arg(&keys))
                    .await?;
            }
            batches += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, deleted = total, batches, "Pattern delete finished");
        Ok(total)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let reply: String = self.run("ping", &redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::backend("ping", format!("unexpected reply `{reply}`")))
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        if rw_write(&self.connection, SOURCE, "close").take().is_some() {
            info!("Closed redis cache connection");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
