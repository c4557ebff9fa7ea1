//! Redis-backed registry store.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::{debug, info};

use crate::error::{CoordinatorError, Result};
use crate::registry::store::RegistryStore;

/// Releases a lock only when the caller's fencing token still owns it.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisRegistryStore {
    conn: ConnectionManager,
    release_lock: Script,
}

impl std::fmt::Debug for RedisRegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRegistryStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisRegistryStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to registry store at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(|e| {
            CoordinatorError::Storage(format!("failed to create redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            CoordinatorError::Storage(format!("failed to connect to redis: {e}"))
        })?;

        info!("Registry store connection established");

        Ok(Self {
            conn,
            release_lock: Script::new(RELEASE_LOCK_SCRIPT),
        })
    }
}

#[async_trait]
impl RegistryStore for RedisRegistryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis GET failed: {e}")))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis SET failed: {e}")))
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let created: bool = conn
            .set_nx(key, value)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis SETNX failed: {e}")))?;
        Ok(created)
    }

    async fn values_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();

        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis KEYS failed: {e}")))?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Registry prefix scan matched {} keys", keys.len());

        let values: Vec<Option<String>> = conn
            .mget(keys)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis MGET failed: {e}")))?;

        Ok(values.into_iter().flatten().collect())
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SET NX PX is the atomic compare-and-set the lease relies on.
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis SET NX PX failed: {e}")))?;

        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let released: i64 = self
            .release_lock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::Storage(format!("redis unlock script failed: {e}")))?;

        Ok(released == 1)
    }
}
