use super::lua_scripts::{INCREMENT_SCRIPT, SET_MARKER_SCRIPT};
use super::store::{CounterSnapshot, CounterStore};
use crate::error::{Result, ThrottleError};
use crate::metrics;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use secrecy::{ExposeSecret, Secret};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Redis-backed counter store shared by every service instance
pub struct RedisCounterStore {
    /// Redis client used to (re)establish the connection
    client: redis::Client,
    /// Multiplexed connection, `None` until the first successful connect
    connection: RwLock<Option<ConnectionManager>>,
    /// Upper bound for every store call
    op_timeout: Duration,
    increment: Script,
    set_marker: Script,
}

impl RedisCounterStore {
    /// Create a store without connecting yet.
    ///
    /// The connection is established lazily by the first call.
    pub fn new(url: &Secret<String>, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url.expose_secret().as_str())
            .map_err(|e| ThrottleError::Config(format!("Invalid counter store URL: {}", e)))?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            op_timeout,
            increment: Script::new(INCREMENT_SCRIPT),
            set_marker: Script::new(SET_MARKER_SCRIPT),
        })
    }

    /// Create a store and verify the connection within `connect_timeout`
    pub async fn connect(
        url: &Secret<String>,
        op_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let store = Self::new(url, op_timeout)?;

        tokio::time::timeout(connect_timeout, store.connection())
            .await
            .map_err(|_| {
                ThrottleError::StoreUnavailable(format!(
                    "connection not established within {:?}",
                    connect_timeout
                ))
            })??;
        store.ping().await?;

        info!("Counter store connection established");
        Ok(store)
    }

    /// Get the shared connection, connecting on first use
    async fn connection(&self) -> Result<ConnectionManager> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Connecting to counter store");
        let conn = ConnectionManager::new(self.client.clone()).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run a store call under the operation timeout
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ThrottleError::StoreUnavailable(format!(
                "{} timed out after {:?}",
                operation, self.op_timeout
            ))),
        };
        metrics::record_store_latency(operation, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            error!(operation, error = %e, "Counter store call failed");
            metrics::record_store_error(operation);
        }
        result
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn ttl_from_millis(ttl_ms: i64) -> Option<Duration> {
    u64::try_from(ttl_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<CounterSnapshot> {
        self.bounded("increment", async {
            let mut conn = self.connection().await?;
            let (count, ttl_ms): (i64, i64) = self
                .increment
                .key(key)
                .arg(millis(ttl))
                .invoke_async(&mut conn)
                .await?;

            debug!(key, count, ttl_ms, "Counter incremented");

            Ok(CounterSnapshot {
                count: u64::try_from(count).unwrap_or(0),
                ttl: ttl_from_millis(ttl_ms).unwrap_or(ttl),
            })
        })
        .await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.bounded("get_ttl", async {
            let mut conn = self.connection().await?;
            let ttl_ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
            Ok(ttl_from_millis(ttl_ms))
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.bounded("set_with_ttl", async {
            let mut conn = self.connection().await?;
            let written: i64 = self
                .set_marker
                .key(key)
                .arg(value)
                .arg(millis(ttl))
                .invoke_async(&mut conn)
                .await?;

            if written == 0 {
                debug!(key, "Kept existing marker with longer expiry");
            }
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("ping", async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
