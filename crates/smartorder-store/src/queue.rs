use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use smartorder_core::{DeadLetterEntry, MessageQueue, ProcessingGuard};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// List-backed queue with the same push-left / pop-right order as the
/// production queue, plus the dedup markers.
#[derive(Default)]
pub struct InMemoryQueue {
    items: Mutex<VecDeque<String>>,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    processed: Mutex<HashSet<String>>,
    claims: Mutex<HashMap<String, usize>>,
    arrivals: Notify,
    dequeue_failures: AtomicU32,
    write_failures: AtomicU32,
    offline: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().await.clone()
    }

    pub async fn pending(&self) -> usize {
        self.items.lock().await.len()
    }

    /// The next `count` dequeues fail as a dropped connection would.
    pub fn fail_next_dequeues(&self, count: u32) {
        self.dequeue_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` enqueues or dead-letter writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    fn injected_write_failure(&self) -> anyhow::Result<()> {
        let injected = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            bail!("queue write failed");
        }
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn claim_holder(&self, key: &str) -> Option<usize> {
        self.claims.lock().await.get(key).copied()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn dequeue(&self, wait: Duration) -> anyhow::Result<Option<String>> {
        let injected = self
            .dequeue_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected || self.offline.load(Ordering::SeqCst) {
            bail!("queue connection lost");
        }

        let deadline = Instant::now() + wait;
        loop {
            let arrived = self.arrivals.notified();
            if let Some(raw) = self.items.lock().await.pop_back() {
                return Ok(Some(raw));
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn enqueue(&self, raw: &str) -> anyhow::Result<()> {
        self.injected_write_failure()?;
        self.items.lock().await.push_front(raw.to_string());
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, entry: &DeadLetterEntry) -> anyhow::Result<()> {
        self.injected_write_failure()?;
        self.dead_letters.lock().await.push(entry.clone());
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("queue unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingGuard for InMemoryQueue {
    async fn is_processed(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.processed.lock().await.contains(key))
    }

    async fn try_claim(&self, key: &str, worker_id: usize) -> anyhow::Result<bool> {
        let mut claims = self.claims.lock().await;
        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(key.to_string(), worker_id);
        Ok(true)
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        self.claims.lock().await.remove(key);
        Ok(())
    }

    async fn mark_processed(&self, key: &str) -> anyhow::Result<()> {
        self.processed.lock().await.insert(key.to_string());
        Ok(())
    }
}
