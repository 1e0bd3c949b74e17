use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};

pub const NS_VERIFY: &str = "verify";
pub const NS_PWRESET: &str = "pwreset";
pub const NS_MFA: &str = "mfa";
pub const NS_BLACKLIST: &str = "blacklist";

/// Namespaced key/value pairs with store-native expiry. An expired key and
/// a key that never existed are indistinguishable to callers.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn store(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), redis::RedisError>;

    async fn get(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError>;

    /// Fetch and delete in one step, so a one-time token can never be
    /// consumed twice inside its TTL window.
    async fn take(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError>;

    /// Replace the value of an existing key without touching its remaining
    /// TTL. A missing key stays missing.
    async fn update(&self, ns: &str, key: &str, value: &str) -> Result<(), redis::RedisError>;

    async fn delete(&self, ns: &str, key: &str) -> Result<(), redis::RedisError>;
}

fn full_key(ns: &str, key: &str) -> String {
    format!("{}:{}", ns, key)
}

// =============================================================================
// REDIS IMPLEMENTATION
// =============================================================================

#[derive(Clone)]
pub struct RedisEphemeralStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisEphemeralStore {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn store(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(full_key(ns, key), value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(full_key(ns, key)).await?;
        Ok(value)
    }

    async fn take(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get_del(full_key(ns, key)).await?;
        Ok(value)
    }

    async fn update(&self, ns: &str, key: &str, value: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::XX)
            .with_expiration(SetExpiry::KEEPTTL);
        let _: redis::Value = conn.set_options(full_key(ns, key), value, opts).await?;
        Ok(())
    }

    async fn delete(&self, ns: &str, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(full_key(ns, key)).await?;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

/// Mutexed map with lazy expiry. Backs tests and local development; the
/// lock is never held across an await point.
#[derive(Default)]
pub struct MemoryEphemeralStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn store(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), redis::RedisError> {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(full_key(ns, key), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut entries = self.entries.lock().unwrap();
        let k = full_key(ns, key);
        match entries.get(&k) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(&k);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn take(&self, ns: &str, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut entries = self.entries.lock().unwrap();
        let k = full_key(ns, key);
        match entries.remove(&k) {
            Some((_, deadline)) if deadline <= Instant::now() => Ok(None),
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn update(&self, ns: &str, key: &str, value: &str) -> Result<(), redis::RedisError> {
        let mut entries = self.entries.lock().unwrap();
        let k = full_key(ns, key);
        if let Some(entry) = entries.get_mut(&k) {
            if entry.1 > Instant::now() {
                entry.0 = value.to_string();
            }
        }
        Ok(())
    }

    async fn delete(&self, ns: &str, key: &str) -> Result<(), redis::RedisError> {
        self.entries.lock().unwrap().remove(&full_key(ns, key));
        Ok(())
    }
}
