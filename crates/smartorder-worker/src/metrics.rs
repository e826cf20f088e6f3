use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Counters shared by every worker and read by the health endpoints.
pub struct QueueMetrics {
    processed: AtomicU64,
    errors: AtomicU64,
    dead_lettered: AtomicU64,
    by_channel: RwLock<BTreeMap<String, u64>>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub dead_letter: u64,
    pub by_channel: BTreeMap<String, u64>,
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: i64,
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            by_channel: RwLock::new(BTreeMap::new()),
            started_at: Utc::now(),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_channel(&self, channel: &str) {
        *self.by_channel.write().await.entry(channel.to_string()).or_insert(0) += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dead_letter: self.dead_lettered.load(Ordering::Relaxed),
            by_channel: self.by_channel.read().await.clone(),
            start_time: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}
