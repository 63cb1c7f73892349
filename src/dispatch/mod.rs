//! Per-entity ordered dispatch.
//!
//! Each [`EntityKey`] gets its own worker with a bounded queue, so
//! deliveries for one PR are processed strictly in arrival order while
//! distinct PRs proceed in parallel. A global semaphore caps how many
//! deliveries run at once regardless of how many workers exist.
//!
//! Backpressure is explicit: a full per-key queue rejects the delivery at
//! ingress (the caller answers 503 and GitHub redelivers), never silently
//! dropping or reordering. A delivery ID seen before is acknowledged
//! without being re-enqueued.

mod record;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handlers::HandlerError;
use crate::types::{DeliveryId, EntityKey};
use crate::webhooks::events::Event;

pub use record::{ExecutionRecord, MemorySink, Outcome, RecordSink, TracingSink};

/// Coarse cap on the duplicate-guard set; when reached, the set resets and
/// very old delivery IDs may be processed again. Redelivery that far apart
/// converges anyway because handlers recompute from ground truth.
const SEEN_CAP: usize = 16_384;

/// One delivery as accepted at ingress.
#[derive(Debug)]
pub struct Delivery {
    pub id: DeliveryId,
    pub event: Event,
    pub received_at: Instant,
}

impl Delivery {
    pub fn new(id: DeliveryId, event: Event) -> Self {
        Delivery {
            id,
            event,
            received_at: Instant::now(),
        }
    }
}

/// Result of handing one delivery to a processor.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOutcome {
    pub handled: bool,
    pub token_spend: u32,
}

/// Processes one delivery; implemented over [`crate::handlers::EventHandler`]
/// in production.
#[async_trait]
pub trait DeliveryProcessor: Send + Sync {
    async fn process(&self, event: &Event) -> Result<ProcessOutcome, HandlerError>;
}

/// How the dispatcher disposed of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued behind the entity's earlier deliveries.
    Queued,
    /// Delivery ID already seen; acknowledged without re-enqueueing.
    Duplicate,
    /// No routing key (no repository in the payload); recorded and done.
    Unroutable,
}

/// The per-key queue is full.
#[derive(Debug, thiserror::Error)]
#[error("delivery backlog full for this entity")]
pub struct BacklogFull;

/// Tuning knobs, normally taken from [`crate::config::ServerConfig`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub queue_depth: usize,
    pub max_workers: usize,
    pub delivery_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            queue_depth: 64,
            max_workers: 16,
            delivery_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    processor: Arc<dyn DeliveryProcessor>,
    sink: Arc<dyn RecordSink>,
    options: DispatchOptions,
    workers: RwLock<HashMap<EntityKey, mpsc::Sender<Delivery>>>,
    seen: Mutex<HashSet<DeliveryId>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        processor: Arc<dyn DeliveryProcessor>,
        sink: Arc<dyn RecordSink>,
        options: DispatchOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_workers));
        Dispatcher {
            inner: Arc::new(Inner {
                processor,
                sink,
                options,
                workers: RwLock::new(HashMap::new()),
                seen: Mutex::new(HashSet::new()),
                permits,
                shutdown: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Routes a delivery to its entity's worker.
    pub async fn enqueue(&self, delivery: Delivery) -> Result<Enqueued, BacklogFull> {
        let Some(key) = delivery.event.entity_key() else {
            // Nothing to route on; complete at ingress with a record.
            self.inner.sink.record(ExecutionRecord {
                delivery_id: delivery.id,
                event_type: delivery.event.kind().to_string(),
                entity: None,
                queued_for: Duration::ZERO,
                processed_in: Duration::ZERO,
                token_spend: 0,
                handled: false,
                outcome: Outcome::Succeeded,
            });
            return Ok(Enqueued::Unroutable);
        };

        {
            let mut seen = self.inner.seen.lock().await;
            if seen.len() >= SEEN_CAP {
                seen.clear();
            }
            if !seen.insert(delivery.id.clone()) {
                debug!(delivery = %delivery.id, "duplicate delivery acknowledged");
                return Ok(Enqueued::Duplicate);
            }
        }

        let mut delivery = delivery;
        loop {
            let sender = self.sender_for(&key).await;
            match sender.try_send(delivery) {
                Ok(()) => return Ok(Enqueued::Queued),
                Err(TrySendError::Full(d)) => {
                    // Forget the ID so GitHub's redelivery is accepted.
                    self.inner.seen.lock().await.remove(&d.id);
                    warn!(entity = %key, "backlog full, rejecting delivery");
                    return Err(BacklogFull);
                }
                Err(TrySendError::Closed(d)) => {
                    // The worker exited idle between lookup and send;
                    // drop the stale entry and respawn.
                    let mut workers = self.inner.workers.write().await;
                    if workers.get(&key).is_some_and(|s| s.is_closed()) {
                        workers.remove(&key);
                    }
                    delivery = d;
                }
            }
        }
    }

    /// Stops accepting work and waits for in-flight deliveries to finish.
    pub async fn shutdown_all(&self) {
        self.inner.shutdown.cancel();
        self.inner.workers.write().await.clear();
        let handles: Vec<_> = self.inner.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn sender_for(&self, key: &EntityKey) -> mpsc::Sender<Delivery> {
        {
            let workers = self.inner.workers.read().await;
            if let Some(sender) = workers.get(key) {
                if !sender.is_closed() {
                    return sender.clone();
                }
            }
        }

        let mut workers = self.inner.workers.write().await;
        // Re-check under the write lock; another enqueue may have won.
        if let Some(sender) = workers.get(key) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.inner.options.queue_depth);
        let inner = Arc::clone(&self.inner);
        let worker_key = key.clone();
        let handle = tokio::spawn(async move {
            worker_loop(inner, worker_key, rx).await;
        });
        self.inner.handles.lock().await.push(handle);
        workers.insert(key.clone(), tx.clone());
        tx
    }
}

async fn worker_loop(inner: Arc<Inner>, key: EntityKey, mut rx: mpsc::Receiver<Delivery>) {
    debug!(entity = %key, "worker started");
    loop {
        let delivery = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = tokio::time::timeout(inner.options.idle_timeout, rx.recv()) => {
                match next {
                    Ok(Some(delivery)) => delivery,
                    // Channel closed or idle too long; a later delivery
                    // respawns the worker.
                    Ok(None) | Err(_) => break,
                }
            }
        };
        process_one(&inner, &key, delivery).await;
    }
    debug!(entity = %key, "worker exiting");
}

async fn process_one(inner: &Inner, key: &EntityKey, delivery: Delivery) {
    let Ok(_permit) = inner.permits.acquire().await else {
        return;
    };
    let queued_for = delivery.received_at.elapsed();
    let started = Instant::now();

    let result = tokio::time::timeout(
        inner.options.delivery_timeout,
        inner.processor.process(&delivery.event),
    )
    .await;
    let processed_in = started.elapsed();

    let (handled, token_spend, outcome) = match result {
        Ok(Ok(out)) => (out.handled, out.token_spend, Outcome::Succeeded),
        Ok(Err(error)) => {
            warn!(delivery = %delivery.id, %error, "delivery failed");
            (false, 0, Outcome::Failed(error.to_string()))
        }
        Err(_) => {
            warn!(delivery = %delivery.id, "delivery timed out");
            (false, 0, Outcome::TimedOut)
        }
    };

    inner.sink.record(ExecutionRecord {
        delivery_id: delivery.id,
        event_type: delivery.event.kind().to_string(),
        entity: Some(key.clone()),
        queued_for,
        processed_in,
        token_spend,
        handled,
        outcome,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::types::{PrNumber, RepoId, Sha};
    use crate::webhooks::events::{PrAction, PullRequestEvent};

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    /// The title carries a sequence marker so processors can observe order.
    fn event_for(number: u64, seq: &str) -> Event {
        Event::PullRequest(PullRequestEvent {
            repo: repo(),
            action: PrAction::Synchronize,
            pr_number: PrNumber(number),
            title: seq.into(),
            author: "a".into(),
            head_sha: Sha::new("a".repeat(40)),
            base_branch: "main".into(),
            head_branch: "b".into(),
            draft: false,
            merged: false,
            merge_commit_sha: None,
        })
    }

    fn delivery(id: &str, number: u64) -> Delivery {
        Delivery::new(DeliveryId::new(id), event_for(number, id))
    }

    /// Records the order deliveries arrive in, with an optional pause to
    /// create contention.
    struct OrderProcessor {
        seen: StdMutex<Vec<String>>,
        pause: Duration,
    }

    #[async_trait]
    impl DeliveryProcessor for OrderProcessor {
        async fn process(&self, event: &Event) -> Result<ProcessOutcome, HandlerError> {
            tokio::time::sleep(self.pause).await;
            if let Event::PullRequest(e) = event {
                self.seen.lock().unwrap().push(e.title.clone());
            }
            Ok(ProcessOutcome {
                handled: true,
                token_spend: 1,
            })
        }
    }

    /// Blocks on a zero-permit semaphore until the test releases it, to
    /// hold a queue full. Permits accumulate, so releases are never lost.
    struct GateProcessor {
        gate: Arc<Semaphore>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DeliveryProcessor for GateProcessor {
        async fn process(&self, _event: &Event) -> Result<ProcessOutcome, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(ProcessOutcome {
                handled: true,
                token_spend: 0,
            })
        }
    }

    fn options() -> DispatchOptions {
        DispatchOptions {
            queue_depth: 4,
            max_workers: 8,
            delivery_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }

    async fn wait_for_records(sink: &MemorySink, count: usize) {
        for _ in 0..500 {
            if sink.records().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} records, got {}", sink.records().len());
    }

    #[tokio::test]
    async fn deliveries_for_one_entity_keep_arrival_order() {
        let processor = Arc::new(OrderProcessor {
            seen: StdMutex::new(Vec::new()),
            pause: Duration::from_millis(5),
        });
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(processor.clone(), sink.clone(), options());

        // Same entity: all PR 1. IDs differ so nothing is deduplicated.
        for i in 0..4 {
            dispatcher
                .enqueue(delivery(&format!("d{i}"), 1))
                .await
                .unwrap();
        }
        wait_for_records(&sink, 4).await;

        assert_eq!(
            *processor.seen.lock().unwrap(),
            vec!["d0", "d1", "d2", "d3"]
        );
        let records = sink.records();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.outcome == Outcome::Succeeded));
    }

    #[tokio::test]
    async fn distinct_entities_process_in_parallel() {
        // One worker per entity; a held entity must not block another.
        let gate = Arc::new(Semaphore::new(0));
        let processor = Arc::new(GateProcessor {
            gate: gate.clone(),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(processor.clone(), sink.clone(), options());

        dispatcher.enqueue(delivery("d1", 1)).await.unwrap();
        dispatcher.enqueue(delivery("d2", 2)).await.unwrap();

        // Both workers reach the gate despite neither completing.
        for _ in 0..500 {
            if processor.calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);
        gate.add_permits(2);
        wait_for_records(&sink, 2).await;
    }

    #[tokio::test]
    async fn full_backlog_rejects_with_503_semantics() {
        let gate = Arc::new(Semaphore::new(0));
        let processor = Arc::new(GateProcessor {
            gate: gate.clone(),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(MemorySink::new());
        let mut opts = options();
        opts.queue_depth = 1;
        let dispatcher = Dispatcher::new(processor.clone(), sink.clone(), opts);

        // First delivery occupies the worker; the queue holds one more.
        dispatcher.enqueue(delivery("d0", 1)).await.unwrap();
        for _ in 0..500 {
            if processor.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.enqueue(delivery("d1", 1)).await.unwrap();

        let result = dispatcher.enqueue(delivery("d2", 1)).await;
        assert!(result.is_err());

        // The rejected ID was forgotten, so redelivery is accepted once
        // the queue drains.
        gate.add_permits(2);
        wait_for_records(&sink, 2).await;
        assert_eq!(
            dispatcher.enqueue(delivery("d2", 1)).await.unwrap(),
            Enqueued::Queued
        );
        gate.add_permits(1);
        wait_for_records(&sink, 3).await;
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_once() {
        let processor = Arc::new(OrderProcessor {
            seen: StdMutex::new(Vec::new()),
            pause: Duration::ZERO,
        });
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(processor.clone(), sink.clone(), options());

        assert_eq!(
            dispatcher.enqueue(delivery("same-id", 1)).await.unwrap(),
            Enqueued::Queued
        );
        assert_eq!(
            dispatcher.enqueue(delivery("same-id", 1)).await.unwrap(),
            Enqueued::Duplicate
        );
        wait_for_records(&sink, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn timed_out_delivery_is_recorded_as_such() {
        let processor = Arc::new(GateProcessor {
            gate: Arc::new(Semaphore::new(0)),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(MemorySink::new());
        let mut opts = options();
        opts.delivery_timeout = Duration::from_millis(20);
        let dispatcher = Dispatcher::new(processor, sink.clone(), opts);

        dispatcher.enqueue(delivery("d0", 1)).await.unwrap();
        wait_for_records(&sink, 1).await;
        assert_eq!(sink.records()[0].outcome, Outcome::TimedOut);
        assert!(!sink.records()[0].handled);
    }

    #[tokio::test]
    async fn unroutable_event_is_recorded_at_ingress() {
        let processor = Arc::new(OrderProcessor {
            seen: StdMutex::new(Vec::new()),
            pause: Duration::ZERO,
        });
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(processor, sink.clone(), options());

        let event = Event::Unknown {
            repo: None,
            event_type: "ping".into(),
        };
        let disposition = dispatcher
            .enqueue(Delivery::new(DeliveryId::new("p1"), event))
            .await
            .unwrap();
        assert_eq!(disposition, Enqueued::Unroutable);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].event_type, "ping");
        assert!(sink.records()[0].entity.is_none());
    }

    #[tokio::test]
    async fn worker_respawns_after_idle_exit() {
        let processor = Arc::new(OrderProcessor {
            seen: StdMutex::new(Vec::new()),
            pause: Duration::ZERO,
        });
        let sink = Arc::new(MemorySink::new());
        let mut opts = options();
        opts.idle_timeout = Duration::from_millis(10);
        let dispatcher = Dispatcher::new(processor, sink.clone(), opts);

        dispatcher.enqueue(delivery("d0", 1)).await.unwrap();
        wait_for_records(&sink, 1).await;
        // Let the worker idle out, then deliver again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.enqueue(delivery("d1", 1)).await.unwrap();
        wait_for_records(&sink, 2).await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_workers() {
        let processor = Arc::new(OrderProcessor {
            seen: StdMutex::new(Vec::new()),
            pause: Duration::from_millis(5),
        });
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(processor, sink.clone(), options());

        dispatcher.enqueue(delivery("d0", 1)).await.unwrap();
        dispatcher.shutdown_all().await;
    }
}
