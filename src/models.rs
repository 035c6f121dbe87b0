//! Application configuration, loaded from the environment.

use std::time::Duration;

use crate::detectors::DetectorConfig;
use crate::queue::QueueConfig;
use crate::universe::SyncConfig;
use crate::workers::WorkerPoolConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub redis_url: String,
    pub port: u16,

    // Queue
    pub max_queue_size: usize,
    pub queue_overflow_drop_threshold: f64,
    pub max_event_age_ms: u64,
    pub event_batch_size: usize,
    pub circuit_breaker_fail_max: u32,
    pub circuit_breaker_timeout_seconds: u64,
    pub market_open_tickers: Vec<String>,

    // Workers
    pub worker_pool_size: usize,
    pub min_worker_pool_size: usize,
    pub max_worker_pool_size: usize,
    pub worker_event_batch_size: usize,
    pub worker_collection_timeout_seconds: f64,

    // Display channel
    pub display_channel_capacity: usize,

    // Priority cache
    pub priority_cache_refresh_seconds: u64,

    // Synchronizer
    pub sync_timeout_minutes: u64,
    pub eod_wait_timeout_seconds: u64,

    // Synthetic feed (demo / soak runs)
    pub synthetic_feed: bool,
    pub synthetic_tickers: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            database_path: env_or("DATABASE_PATH", "./tickstock.db"),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            port: parse_or("PORT", 8080),
            max_queue_size: parse_or("MAX_QUEUE_SIZE", 100_000),
            queue_overflow_drop_threshold: parse_or("QUEUE_OVERFLOW_DROP_THRESHOLD", 0.98),
            max_event_age_ms: parse_or("MAX_EVENT_AGE_MS", 120_000),
            event_batch_size: parse_or("EVENT_BATCH_SIZE", 1000),
            circuit_breaker_fail_max: parse_or("CIRCUIT_BREAKER_FAIL_MAX", 5),
            circuit_breaker_timeout_seconds: parse_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", 30),
            market_open_tickers: list_or("MARKET_OPEN_TICKERS", "SPY,QQQ,IWM,DIA"),
            worker_pool_size: parse_or("WORKER_POOL_SIZE", 12),
            min_worker_pool_size: parse_or("MIN_WORKER_POOL_SIZE", 8),
            max_worker_pool_size: parse_or("MAX_WORKER_POOL_SIZE", 16),
            worker_event_batch_size: parse_or("WORKER_EVENT_BATCH_SIZE", 500),
            worker_collection_timeout_seconds: parse_or("WORKER_COLLECTION_TIMEOUT_SECONDS", 0.5),
            display_channel_capacity: parse_or("DISPLAY_CHANNEL_CAPACITY", 10_000),
            priority_cache_refresh_seconds: parse_or("PRIORITY_CACHE_REFRESH_SECONDS", 300),
            sync_timeout_minutes: parse_or("SYNC_TIMEOUT_MINUTES", 30),
            eod_wait_timeout_seconds: parse_or("EOD_WAIT_TIMEOUT_SECONDS", 3600),
            synthetic_feed: env_or("SYNTHETIC_FEED", "false").eq_ignore_ascii_case("true"),
            synthetic_tickers: list_or("SYNTHETIC_TICKERS", "AAPL,MSFT,NVDA,TSLA,SPY"),
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_queue_size: self.max_queue_size,
            overflow_drop_threshold: self.queue_overflow_drop_threshold,
            max_event_age_ms: self.max_event_age_ms,
            event_batch_size: self.event_batch_size,
            circuit_breaker_fail_max: self.circuit_breaker_fail_max,
            circuit_breaker_timeout: Duration::from_secs(self.circuit_breaker_timeout_seconds),
            market_open_tickers: self.market_open_tickers.clone(),
        }
    }

    pub fn worker_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            initial_size: self.worker_pool_size,
            min_size: self.min_worker_pool_size,
            max_size: self.max_worker_pool_size,
            batch_size: self.worker_event_batch_size,
            collection_timeout: Duration::from_secs_f64(self.worker_collection_timeout_seconds),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            sync_timeout_minutes: self.sync_timeout_minutes,
            eod_wait_timeout_seconds: self.eod_wait_timeout_seconds,
            ..SyncConfig::default()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig::default()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn list_or(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
