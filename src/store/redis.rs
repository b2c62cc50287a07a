//! Redis-backed counter store
//!
//! Counter records live in Redis hashes so exposure and conversion
//! increments are single atomic `HINCRBY`s and a weight write is one
//! multi-field `HSET`. Connections are pooled through deadpool; create
//! performs AUTH/SELECT, recycle re-validates with PING.

use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use super::resp::{self, Reply};
use super::{CounterStore, StoreError, VariantCounters};
use crate::config::StoreConfig;
use crate::constants::store as layout;
use crate::types::VariantKey;

/// One authenticated RESP connection
#[derive(Debug)]
pub struct RespConnection {
    stream: BufStream<TcpStream>,
}

impl RespConnection {
    /// Send one command and read its reply
    pub async fn command(&mut self, args: &[&str]) -> Result<Reply, StoreError> {
        self.stream.write_all(&resp::encode_command(args)).await?;
        self.stream.flush().await?;
        resp::read_reply(&mut self.stream).await
    }
}

/// RESP connection manager for deadpool
#[derive(Debug)]
pub struct RespManager {
    address: String,
    db: u32,
    password: Option<String>,
}

impl RespManager {
    fn new(config: &StoreConfig) -> Self {
        Self {
            address: config.address(),
            db: config.db,
            password: config.password.clone(),
        }
    }
}

impl managed::Manager for RespManager {
    type Type = RespConnection;
    type Error = StoreError;

    async fn create(&self) -> Result<RespConnection, StoreError> {
        debug!("Creating new store connection to {}", self.address);
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;

        let mut conn = RespConnection {
            stream: BufStream::new(stream),
        };

        if let Some(password) = &self.password {
            conn.command(&["AUTH", password]).await?.expect_ok()?;
        }
        if self.db != 0 {
            let db = self.db.to_string();
            conn.command(&["SELECT", &db]).await?.expect_ok()?;
        }

        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut RespConnection,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<StoreError> {
        match conn.command(&["PING"]).await {
            Ok(Reply::Simple(pong)) if pong == "PONG" => Ok(()),
            Ok(other) => Err(managed::RecycleError::Message(
                format!("unexpected PING reply: {:?}", other).into(),
            )),
            Err(e) => {
                debug!("Store connection failed recycle check: {}", e);
                Err(managed::RecycleError::Message(e.to_string().into()))
            }
        }
    }
}

type Pool = managed::Pool<RespManager>;

/// Production `CounterStore` backed by Redis
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
}

impl RedisCounterStore {
    /// Build the store and its connection pool; no I/O happens until the
    /// first command
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let manager = RespManager::new(config);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<managed::Object<RespManager>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn hincrby(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.command(&["HINCRBY", key, field, "1"])
            .await?
            .into_integer()?;
        Ok(())
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn escape_match_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_exposure(&self, key: &VariantKey) -> Result<(), StoreError> {
        self.hincrby(&key.storage_key(), layout::FIELD_EXPOSURES)
            .await
    }

    async fn incr_conversion(&self, key: &VariantKey) -> Result<(), StoreError> {
        self.hincrby(&key.storage_key(), layout::FIELD_CONVERSIONS)
            .await
    }

    async fn counters(&self, key: &VariantKey) -> Result<VariantCounters, StoreError> {
        let mut conn = self.conn().await?;
        let reply = conn.command(&["HGETALL", &key.storage_key()]).await?;
        let mut counters = VariantCounters::default();
        for (field, value) in resp::reply_to_field_pairs(reply)? {
            match field.as_str() {
                layout::FIELD_EXPOSURES => counters.exposures = value.parse().unwrap_or(0),
                layout::FIELD_CONVERSIONS => counters.conversions = value.parse().unwrap_or(0),
                layout::FIELD_WEIGHT => counters.weight = value.parse().ok(),
                layout::FIELD_LAST_UPDATED => counters.last_updated = value.parse().ok(),
                _ => {}
            }
        }
        Ok(counters)
    }

    async fn set_weight(
        &self,
        key: &VariantKey,
        weight: f64,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        // A single multi-field HSET keeps weight and timestamp atomic and
        // leaves the counter fields untouched.
        let mut conn = self.conn().await?;
        let weight = weight.to_string();
        let updated_at = updated_at.to_string();
        conn.command(&[
            "HSET",
            &key.storage_key(),
            layout::FIELD_WEIGHT,
            &weight,
            layout::FIELD_LAST_UPDATED,
            &updated_at,
        ])
        .await?
        .into_integer()?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = escape_match_pattern(prefix);
        let count = layout::SCAN_COUNT.to_string();
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        let mut cursor = "0".to_string();

        loop {
            let reply = conn
                .command(&["SCAN", &cursor, "MATCH", &pattern, "COUNT", &count])
                .await?;
            let mut items = reply.into_array()?.into_iter();
            cursor = items
                .next()
                .ok_or_else(|| StoreError::Protocol("SCAN reply missing cursor".to_string()))?
                .into_text()?
                .ok_or_else(|| StoreError::Protocol("SCAN cursor was null".to_string()))?;
            let batch = items
                .next()
                .ok_or_else(|| StoreError::Protocol("SCAN reply missing key batch".to_string()))?;
            for key in batch.into_array()? {
                if let Some(key) = key.into_text()? {
                    keys.push(key);
                }
            }
            if cursor == "0" {
                return Ok(keys);
            }
        }
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let ttl_ms = ttl.as_millis().max(1).to_string();
        match conn
            .command(&["SET", key, token, "NX", "PX", &ttl_ms])
            .await?
        {
            Reply::Simple(_) => Ok(true),
            Reply::Bulk(None) => Ok(false),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "unexpected SET NX reply: {:?}",
                other
            ))),
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError> {
        // Owner check and delete are two commands; the TTL bounds the
        // damage if we lose the race against expiry.
        let mut conn = self.conn().await?;
        let owner = conn.command(&["GET", key]).await?.into_text()?;
        if owner.as_deref() == Some(token) {
            conn.command(&["DEL", key]).await?.into_integer()?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match conn.command(&["PING"]).await? {
            Reply::Simple(pong) if pong == "PONG" => Ok(()),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "unexpected PING reply: {:?}",
                other
            ))),
        }
    }
}
