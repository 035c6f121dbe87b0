//! Message bus for synchronizer notifications and the EOD signal.
//!
//! Downstream consumers subscribe to the `tickstock.*` channels; the
//! transport is Redis pub/sub in production and an in-memory recorder in
//! tests. Publishing is best-effort: a failed publish is logged by the
//! caller and the affected change is retried on the next synchronizer
//! pass.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const CACHE_SYNC_COMPLETE: &str = "tickstock.cache.sync_complete";
pub const UNIVERSE_UPDATED: &str = "tickstock.universe.updated";
pub const IPO_ASSIGNMENT: &str = "tickstock.cache.ipo_assignment";
pub const DELISTING_CLEANUP: &str = "tickstock.cache.delisting_cleanup";

/// Channels the EOD completion signal may arrive on.
pub const EOD_CHANNELS: [&str; 3] = [
    "eod_complete",
    "tickstock.eod.complete",
    "market_data.eod_complete",
];

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &Value) -> Result<()>;

    /// Block until the EOD signal arrives. `Ok(true)` means the signal
    /// was received, `Ok(false)` a timeout.
    async fn wait_for_eod(&self, timeout: Duration) -> Result<bool>;
}

/// Standard message envelope: `{timestamp, service, event_type, ...payload}`.
pub fn envelope(service: &str, event_type: &str, payload: Value) -> Value {
    let mut message = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "service": service,
        "event_type": event_type,
    });
    if let (Some(message_map), Value::Object(payload_map)) = (message.as_object_mut(), payload) {
        for (key, value) in payload_map {
            message_map.insert(key, value);
        }
    }
    message
}

pub struct RedisBus {
    conn: tokio::sync::Mutex<redis::aio::ConnectionManager>,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("redis connection failed")?;
        info!(url, "redis bus connected");
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &Value) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let subscribers: i64 = conn
            .publish(channel, payload.to_string())
            .await
            .with_context(|| format!("publish to {channel} failed"))?;
        debug!(channel, subscribers, "bus message published");
        Ok(())
    }

    async fn wait_for_eod(&self, timeout: Duration) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        // The EOD producer pushes onto a list; BLPOP covers all candidate
        // channels with one blocking call.
        let result: Option<(String, String)> = conn
            .blpop(&EOD_CHANNELS[..], timeout.as_secs_f64())
            .await
            .context("blpop for EOD signal failed")?;
        if let Some((channel, _)) = &result {
            info!(channel, "EOD completion signal received");
        }
        Ok(result.is_some())
    }
}

/// Stand-in bus when Redis is unavailable: publishes vanish, the EOD
/// wait resolves immediately so the sync still runs.
#[derive(Default)]
pub struct NoopBus;

#[async_trait]
impl MessageBus for NoopBus {
    async fn publish(&self, channel: &str, _payload: &Value) -> Result<()> {
        debug!(channel, "noop bus: publish dropped");
        Ok(())
    }

    async fn wait_for_eod(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }
}

/// Recording bus for tests.
#[derive(Default)]
pub struct InMemoryBus {
    published: Mutex<Vec<(String, Value)>>,
    eod_ready: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_eod(&self) {
        self.eod_ready.store(true, Ordering::Release);
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &Value) -> Result<()> {
        self.published
            .lock()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }

    async fn wait_for_eod(&self, _timeout: Duration) -> Result<bool> {
        Ok(self.eod_ready.swap(false, Ordering::AcqRel))
    }
}
