use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use smartorder_core::{DeadLetterEntry, MessageQueue, ProcessingGuard, QueueMessage};
use smartorder_platform::QueueConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::QueueMetrics;
use crate::processor::{HandleOutcome, MessageHandler};

const MESSAGE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub dequeue_wait: Duration,
    pub reconnect_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            dequeue_wait: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries.max(1),
            ..Self::default()
        }
    }
}

/// Fixed set of workers draining the ingestion queue. Each worker handles
/// one message at a time and keeps its own retry counters.
pub struct WorkerPool {
    queue: Arc<dyn MessageQueue>,
    guard: Arc<dyn ProcessingGuard>,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<QueueMetrics>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        guard: Arc<dyn ProcessingGuard>,
        handler: Arc<dyn MessageHandler>,
        metrics: Arc<QueueMetrics>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            guard,
            handler,
            metrics,
            settings,
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (1..=self.settings.concurrency)
            .map(|id| {
                let worker = Worker {
                    id,
                    pool: self.clone(),
                    retries: HashMap::new(),
                };
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    pool: Arc<WorkerPool>,
    retries: HashMap<String, u32>,
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.id;
        info!(worker_id, "worker started");

        while !*shutdown.borrow() {
            match self.pool.queue.dequeue(self.pool.settings.dequeue_wait).await {
                Ok(Some(raw)) => self.process(&raw).await,
                Ok(None) => {}
                Err(err) => {
                    error!(worker_id, error = %err, "queue unavailable, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(self.pool.settings.reconnect_delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(worker_id, "worker stopped");
    }

    async fn process(&mut self, raw: &str) {
        let worker_id = self.id;
        let message: QueueMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                let preview: String = raw.chars().take(MESSAGE_PREVIEW_CHARS).collect();
                error!(worker_id, error = %err, message_preview = %preview, "dropping malformed message");
                self.pool.metrics.record_error();
                return;
            }
        };
        let Some(channel) = message.channel() else {
            warn!(worker_id, channel = %message.channel, "dropping message from unknown channel");
            return;
        };
        self.pool.metrics.record_channel(channel.as_str()).await;

        let correlation_id = message.correlation_id();
        let dedup_key = message.dedup_key();
        if let Some(key) = dedup_key {
            if !self.claim(key).await {
                return;
            }
        }

        info!(worker_id, message_id = %correlation_id, %channel, "processing message");
        let outcome = self.pool.handler.handle(channel, &message).await;

        if let Some(key) = dedup_key {
            if let Err(err) = self.pool.guard.release(key).await {
                warn!(worker_id, message_id = %key, error = %err, "failed to release processing claim");
            }
        }

        match outcome {
            Ok(HandleOutcome::Rejected { reason }) => {
                warn!(worker_id, message_id = %correlation_id, %channel, %reason, "dropping message that cannot be processed");
                self.pool.metrics.record_error();
                self.finish(&correlation_id, dedup_key).await;
            }
            Ok(outcome) => {
                match &outcome {
                    HandleOutcome::OrderCreated { order_number, .. } => {
                        info!(worker_id, message_id = %correlation_id, %channel, %order_number, "message processed")
                    }
                    _ => {
                        info!(worker_id, message_id = %correlation_id, %channel, "message processed, awaiting clarification")
                    }
                }
                self.pool.metrics.record_processed();
                self.finish(&correlation_id, dedup_key).await;
            }
            Err(err) => {
                self.pool.metrics.record_error();
                self.retry_or_dead_letter(raw, &correlation_id, format!("{err:#}")).await;
            }
        }
    }

    /// Forgets the retry count and marks the message as handled.
    async fn finish(&mut self, correlation_id: &str, dedup_key: Option<&str>) {
        self.retries.remove(correlation_id);
        if let Some(key) = dedup_key {
            if let Err(err) = self.pool.guard.mark_processed(key).await {
                warn!(worker_id = self.id, message_id = %key, error = %err, "failed to mark message as processed");
            }
        }
    }

    /// Returns `false` when the message was already handled or another
    /// worker holds it. Guard failures let the message through.
    async fn claim(&self, key: &str) -> bool {
        let worker_id = self.id;
        match self.pool.guard.is_processed(key).await {
            Ok(true) => {
                info!(worker_id, message_id = %key, "message already processed, skipping");
                return false;
            }
            Ok(false) => {}
            Err(err) => warn!(worker_id, message_id = %key, error = %err, "processed check failed"),
        }

        match self.pool.guard.try_claim(key, worker_id).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(worker_id, message_id = %key, "message is being processed by another worker, skipping");
                false
            }
            Err(err) => {
                warn!(worker_id, message_id = %key, error = %err, "processing claim failed");
                true
            }
        }
    }

    async fn retry_or_dead_letter(&mut self, raw: &str, correlation_id: &str, error: String) {
        let worker_id = self.id;
        let max_retries = self.pool.settings.max_retries;
        let attempts = {
            let count = self.retries.entry(correlation_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if attempts < max_retries {
            warn!(worker_id, message_id = %correlation_id, attempt = attempts, max_retries, %error, "message failed, re-enqueueing");
            match self.pool.queue.enqueue(raw).await {
                Ok(()) => return,
                Err(err) => {
                    error!(worker_id, message_id = %correlation_id, error = %err, "failed to re-enqueue message, dead-lettering it");
                }
            }
        }

        let entry = DeadLetterEntry {
            original_message: serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            error,
            timestamp: Utc::now(),
            retries: attempts,
        };
        match self.pool.queue.dead_letter(&entry).await {
            Ok(()) => {
                self.retries.remove(correlation_id);
                self.pool.metrics.record_dead_letter();
                error!(worker_id, message_id = %correlation_id, retries = attempts, error = %entry.error, "message sent to dead letter queue");
            }
            Err(err) => {
                error!(worker_id, message_id = %correlation_id, error = %err, "failed to write dead letter, returning message to the queue");
                if let Err(err) = self.pool.queue.enqueue(raw).await {
                    let preview: String = raw.chars().take(MESSAGE_PREVIEW_CHARS).collect();
                    error!(worker_id, message_id = %correlation_id, error = %err, message_preview = %preview, "message lost");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use smartorder_catalog::CatalogCache;
    use smartorder_core::{CatalogProduct, CatalogSource, Channel};
    use smartorder_orders::OrderService;
    use smartorder_parser::OrderParser;
    use smartorder_store::{InMemoryCatalogSource, InMemoryOrderRepository, InMemoryQueue};
    use uuid::Uuid;

    use super::*;
    use crate::processor::OrderProcessor;

    /// Fails the first `failures` calls, then asks for clarification.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _channel: Channel, _message: &QueueMessage) -> anyhow::Result<HandleOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                anyhow::bail!("catalog unavailable (attempt {call})");
            }
            Ok(HandleOutcome::NeedsClarification {
                questions: vec!["Укажите, пожалуйста, ваш номер телефона".to_string()],
            })
        }
    }

    fn worker(queue: &Arc<InMemoryQueue>, handler: Arc<FlakyHandler>) -> (Arc<QueueMetrics>, Worker) {
        let metrics = Arc::new(QueueMetrics::new());
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            queue.clone(),
            handler,
            metrics.clone(),
            WorkerSettings::default(),
        ));
        let worker = Worker {
            id: 1,
            pool,
            retries: HashMap::new(),
        };
        (metrics, worker)
    }

    fn order_processor() -> (Arc<OrderService>, OrderProcessor) {
        let source: Arc<dyn CatalogSource> = Arc::new(InMemoryCatalogSource::new(vec![CatalogProduct {
            articul: "ФР-00000004".to_string(),
            name: "Холодильник Samsung RB37A5200SA".to_string(),
            price: Decimal::from(65_000),
            stock: 3,
        }]));
        let parser = Arc::new(OrderParser::new(Arc::new(CatalogCache::new(source)), None));
        let orders = Arc::new(OrderService::new(Arc::new(InMemoryOrderRepository::new())));
        (orders.clone(), OrderProcessor::new(parser, orders))
    }

    /// Feeds queued messages to the worker until the queue is empty.
    async fn drain(queue: &InMemoryQueue, worker: &mut Worker) {
        while let Some(raw) = queue.dequeue(Duration::ZERO).await.unwrap() {
            worker.process(&raw).await;
        }
    }

    #[tokio::test]
    async fn failing_message_is_dead_lettered_once() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(u32::MAX);
        let (metrics, mut worker) = worker(&queue, handler.clone());
        queue
            .enqueue(r#"{"channel":"telegram","message_id":"tg-1","message":"холодильник"}"#)
            .await
            .unwrap();

        drain(&queue, &mut worker).await;

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retries, 3);
        assert_eq!(dead[0].error, "catalog unavailable (attempt 3)");
        assert_eq!(dead[0].original_message["message_id"], "tg-1");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(worker.retries.is_empty());
        assert_eq!(queue.claim_holder("tg-1").await, None);
        let snapshot = metrics.snapshot().await;
        assert_eq!((snapshot.errors, snapshot.dead_letter), (3, 1));
    }

    #[tokio::test]
    async fn failed_requeue_falls_back_to_dead_letter() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(u32::MAX);
        let (_, mut worker) = worker(&queue, handler.clone());
        queue.enqueue(r#"{"channel":"telegram","message_id":"tg-2","message":"плита"}"#).await.unwrap();
        queue.fail_next_writes(1);

        drain(&queue, &mut worker).await;

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retries, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(worker.retries.is_empty());
    }

    #[tokio::test]
    async fn failed_dead_letter_keeps_the_message() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(u32::MAX);
        let (metrics, mut worker) = worker(&queue, handler.clone());
        let raw = r#"{"channel":"telegram","message_id":"tg-3","message":"плита"}"#;

        for _ in 0..2 {
            worker.process(raw).await;
            queue.dequeue(Duration::ZERO).await.unwrap();
        }
        queue.fail_next_writes(1);
        worker.process(raw).await;

        assert!(queue.dead_letters().await.is_empty());
        assert_eq!(queue.pending().await, 1);
        assert_eq!(worker.retries.get("tg-3"), Some(&3));

        drain(&queue, &mut worker).await;

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retries, 4);
        assert!(worker.retries.is_empty());
        assert_eq!(metrics.snapshot().await.dead_letter, 1);
    }

    #[tokio::test]
    async fn blank_message_is_dropped_without_retry() {
        let queue = Arc::new(InMemoryQueue::new());
        let (orders, processor) = order_processor();
        let metrics = Arc::new(QueueMetrics::new());
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            queue.clone(),
            Arc::new(processor),
            metrics.clone(),
            WorkerSettings::default(),
        ));
        let mut worker = Worker {
            id: 1,
            pool,
            retries: HashMap::new(),
        };
        queue.enqueue(r#"{"channel":"telegram","message_id":"e-1","message":"   "}"#).await.unwrap();

        drain(&queue, &mut worker).await;

        assert!(queue.dead_letters().await.is_empty());
        assert_eq!(queue.pending().await, 0);
        assert!(worker.retries.is_empty());
        assert!(queue.is_processed("e-1").await.unwrap());
        assert_eq!(metrics.snapshot().await.errors, 1);
        assert!(orders.list_orders(Default::default(), 1, 20).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn recovered_message_clears_its_counter() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(1);
        let (metrics, mut worker) = worker(&queue, handler.clone());
        queue.enqueue(r#"{"channel":"mail","email":"a@b.ru","body":"духовой шкаф"}"#).await.unwrap();

        drain(&queue, &mut worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(queue.dead_letters().await.is_empty());
        assert!(worker.retries.is_empty());
        assert_eq!(metrics.snapshot().await.processed, 1);
    }

    #[tokio::test]
    async fn clarification_counts_as_success() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(0);
        let (metrics, mut worker) = worker(&queue, handler.clone());
        queue.enqueue(r#"{"channel":"yandex_forms","submission_id":7,"data":{}}"#).await.unwrap();

        drain(&queue, &mut worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending().await, 0);
        assert!(queue.is_processed("7").await.unwrap());
        assert_eq!(metrics.snapshot().await.by_channel.get("form"), Some(&1));
    }

    #[tokio::test]
    async fn unknown_channel_is_dropped() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(u32::MAX);
        let (metrics, mut worker) = worker(&queue, handler.clone());
        queue.enqueue(r#"{"channel":"whatsapp","message":"привет"}"#).await.unwrap();
        queue.enqueue("not json").await.unwrap();

        drain(&queue, &mut worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(queue.dead_letters().await.is_empty());
        assert_eq!(queue.pending().await, 0);
        assert_eq!(metrics.snapshot().await.errors, 1);
    }

    #[tokio::test]
    async fn duplicates_are_skipped() {
        let queue = Arc::new(InMemoryQueue::new());
        let handler = FlakyHandler::new(0);
        let (_, mut worker) = worker(&queue, handler.clone());
        queue.mark_processed("done-1").await.unwrap();
        assert!(queue.try_claim("busy-1", 2).await.unwrap());
        queue.enqueue(r#"{"channel":"telegram","message_id":"done-1","message":"a"}"#).await.unwrap();
        queue.enqueue(r#"{"channel":"telegram","message_id":"busy-1","message":"b"}"#).await.unwrap();

        drain(&queue, &mut worker).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.claim_holder("busy-1").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn workers_survive_outages_and_stop_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.fail_next_dequeues(2);
        let handler = FlakyHandler::new(0);
        let metrics = Arc::new(QueueMetrics::new());
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            queue.clone(),
            handler.clone(),
            metrics.clone(),
            WorkerSettings {
                concurrency: 2,
                ..WorkerSettings::default()
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = pool.spawn(shutdown_rx);
        let message_id = Uuid::new_v4().to_string();
        queue
            .enqueue(&format!(r#"{{"channel":"telegram","message_id":"{message_id}","message":"a"}}"#))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send_replace(true);
        futures_util::future::join_all(handles).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_processed(&message_id).await.unwrap());
        assert_eq!(metrics.snapshot().await.processed, 1);
    }
}
