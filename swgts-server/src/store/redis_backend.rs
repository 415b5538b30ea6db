//! Redis-backed store.
//!
//! Regular commands share one multiplexed connection. `BRPOP` would stall every
//! other command queued on that connection, so blocking pops check out a
//! dedicated connection from an idle list and hand it back when they return.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{StateStore, StoreError, StoreOp};

/// Smallest wait handed to `BRPOP`; zero would block forever
const MIN_BLOCKING_WAIT: f64 = 0.01;

/// Connections not currently held by a blocking pop
struct IdleConnections<C> {
    idle: Mutex<Vec<C>>,
}

impl<C> IdleConnections<C> {
    fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> Option<C> {
        self.idle.lock().await.pop()
    }

    async fn checkin(&self, conn: C) {
        self.idle.lock().await.push(conn);
    }
}

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    blocking: Arc<IdleConnections<MultiplexedConnection>>,
}

impl RedisStore {
    /// Open a client and establish the shared connection
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url, "Connected to Redis");
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(IdleConnections::new()),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StateStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.conn().exists(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().get(key).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.conn().scard(key).await?)
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self.conn().lrange(key, start, stop).await?)
    }

    #[instrument(skip_all, fields(ops = ops.len()))]
    async fn atomic(&self, ops: Vec<StoreOp>) -> Result<Vec<i64>, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in ops {
            match op {
                StoreOp::Set { key, value, ttl } => match ttl {
                    Some(ttl) => {
                        pipe.set_ex(key, value, ttl_secs(ttl)).ignore();
                    }
                    None => {
                        pipe.set(key, value).ignore();
                    }
                },
                StoreOp::IncrBy { key, delta } => {
                    pipe.incr(key, delta);
                }
                StoreOp::Expire { key, ttl } => {
                    pipe.expire(key, ttl_secs(ttl) as i64).ignore();
                }
                // Redis refuses variadic commands with no arguments
                StoreOp::SAdd { key, members } if !members.is_empty() => {
                    pipe.sadd(key, members).ignore();
                }
                StoreOp::LPush { key, values } if !values.is_empty() => {
                    pipe.lpush(key, values).ignore();
                }
                StoreOp::Del { keys } if !keys.is_empty() => {
                    pipe.del(keys).ignore();
                }
                StoreOp::LTrim { key, start, stop } => {
                    pipe.ltrim(key, start, stop).ignore();
                }
                StoreOp::SAdd { .. } | StoreOp::LPush { .. } | StoreOp::Del { .. } => {}
            }
        }

        let replies: Vec<i64> = pipe.query_async(&mut self.conn()).await?;
        Ok(replies)
    }

    async fn blocking_pop(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = match self.blocking.checkout().await {
            Some(conn) => conn,
            None => {
                debug!("Opening blocking connection");
                self.client.get_multiplexed_async_connection().await?
            }
        };
        // A failed pop drops its connection; a cancelled one never gets here.
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(list)
            .arg(timeout.as_secs_f64().max(MIN_BLOCKING_WAIT))
            .query_async(&mut conn)
            .await?;
        self.blocking.checkin(conn).await;
        Ok(popped.map(|(_, value)| value))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }
}
