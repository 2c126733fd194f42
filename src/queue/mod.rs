//! Bucketed worker queues
//!
//! Every pipeline layer drains a [`WorkerQueue`]: a fixed set of buckets,
//! each an ordered FIFO with its own worker task. Keys are routed to a
//! bucket by `FNV-1a(locality) mod N`, so keys sharing a locality (namespace
//! for ingestion, model name for graph/REST) are processed sequentially and
//! in order on the same worker, while distinct localities run in parallel.
//!
//! A key already sitting in a bucket is not enqueued twice; once a worker
//! picks it up, a re-add queues it again. This coalesces bursty informer
//! traffic the same way a rate-limited delta queue does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::names::bkt;

/// A layer's per-key work function.
///
/// Errors are logged and dropped here; layers that need retries (REST)
/// route failures to the retry queues themselves.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    /// Process one dequeued key.
    async fn sync(&self, key: String) -> crate::Result<()>;
}

struct Bucket {
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<DashSet<String>>,
}

/// A named, sharded work queue.
pub struct WorkerQueue {
    name: &'static str,
    buckets: Vec<Bucket>,
    receivers: Mutex<Vec<Option<mpsc::UnboundedReceiver<String>>>>,
    slow_sync: Option<Duration>,
}

impl WorkerQueue {
    /// Create a queue with `num_workers` buckets (minimum 1).
    pub fn new(name: &'static str, num_workers: u32) -> Arc<Self> {
        Self::build(name, num_workers, None)
    }

    /// Create a queue whose workers drain once per `tick` instead of
    /// reacting to every key (the slow-retry cadence).
    pub fn with_slow_sync(name: &'static str, num_workers: u32, tick: Duration) -> Arc<Self> {
        Self::build(name, num_workers, Some(tick))
    }

    fn build(name: &'static str, num_workers: u32, slow_sync: Option<Duration>) -> Arc<Self> {
        let num_workers = num_workers.max(1);
        let mut buckets = Vec::with_capacity(num_workers as usize);
        let mut receivers = Vec::with_capacity(num_workers as usize);
        for _ in 0..num_workers {
            let (tx, rx) = mpsc::unbounded_channel();
            buckets.push(Bucket {
                tx,
                pending: Arc::new(DashSet::new()),
            });
            receivers.push(Some(rx));
        }
        Arc::new(Self {
            name,
            buckets,
            receivers: Mutex::new(receivers),
            slow_sync,
        })
    }

    /// Number of buckets/workers.
    pub fn num_workers(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Enqueue a key, bucketed by its locality string.
    pub fn enqueue(&self, locality: &str, key: impl Into<String>) {
        let idx = bkt(locality, self.num_workers());
        self.enqueue_bucket(idx, key.into());
    }

    /// Enqueue a key whose locality is the key itself (model names).
    pub fn enqueue_key(&self, key: impl Into<String>) {
        let key = key.into();
        let idx = bkt(&key, self.num_workers());
        self.enqueue_bucket(idx, key);
    }

    /// Enqueue onto an explicit bucket.
    pub fn enqueue_bucket(&self, idx: u32, key: String) {
        let bucket = &self.buckets[idx as usize % self.buckets.len()];
        if !bucket.pending.insert(key.clone()) {
            debug!(queue = self.name, key = %key, "Key already pending, coalesced");
            return;
        }
        if bucket.tx.send(key).is_err() {
            warn!(queue = self.name, "Enqueue after queue shutdown, key dropped");
        }
    }

    /// Start one worker task per bucket.
    ///
    /// Workers run until `stop` is cancelled; on cancellation each worker
    /// finishes the keys already in its bucket before exiting. `run` may be
    /// called once; later calls return no handles.
    pub async fn run(
        self: &Arc<Self>,
        handler: Arc<dyn QueueHandler>,
        stop: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let mut receivers = self.receivers.lock().await;
        for (idx, slot) in receivers.iter_mut().enumerate() {
            let Some(rx) = slot.take() else { continue };
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let stop = stop.clone();
            let handle = match self.slow_sync {
                None => tokio::spawn(async move {
                    queue.worker_loop(idx, rx, handler, stop).await;
                }),
                Some(tick) => tokio::spawn(async move {
                    queue.ticked_worker_loop(idx, rx, handler, stop, tick).await;
                }),
            };
            handles.push(handle);
        }
        info!(queue = self.name, workers = handles.len(), "Queue workers started");
        handles
    }

    async fn worker_loop(
        &self,
        idx: usize,
        mut rx: mpsc::UnboundedReceiver<String>,
        handler: Arc<dyn QueueHandler>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(key) = rx.recv() => {
                    self.process(idx, key, &handler).await;
                }
                _ = stop.cancelled() => {
                    while let Ok(key) = rx.try_recv() {
                        self.process(idx, key, &handler).await;
                    }
                    debug!(queue = self.name, worker = idx, "Worker idle and stopped");
                    return;
                }
            }
        }
    }

    async fn ticked_worker_loop(
        &self,
        idx: usize,
        mut rx: mpsc::UnboundedReceiver<String>,
        handler: Arc<dyn QueueHandler>,
        stop: CancellationToken,
        tick: Duration,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    while let Ok(key) = rx.try_recv() {
                        self.process(idx, key, &handler).await;
                    }
                }
                _ = stop.cancelled() => {
                    while let Ok(key) = rx.try_recv() {
                        self.process(idx, key, &handler).await;
                    }
                    debug!(queue = self.name, worker = idx, "Ticked worker stopped");
                    return;
                }
            }
        }
    }

    async fn process(&self, idx: usize, key: String, handler: &Arc<dyn QueueHandler>) {
        // Remove from pending before the handler runs so a concurrent
        // re-add during processing queues the key again.
        self.buckets[idx].pending.remove(&key);
        if let Err(e) = handler.sync(key.clone()).await {
            warn!(queue = self.name, key = %key, error = %e, "Handler failed, key dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        seen: StdMutex<Vec<String>>,
        notify: tokio::sync::Notify,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
            })
        }

        fn keys(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueHandler for Recorder {
        async fn sync(&self, key: String) -> crate::Result<()> {
            self.seen.lock().unwrap().push(key);
            self.notify.notify_waiters();
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(rec: &Recorder, cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            let _ = tokio::time::timeout(Duration::from_millis(10), rec.notify.notified()).await;
        }
        panic!("condition not reached; saw {:?}", rec.keys());
    }

    #[tokio::test]
    async fn per_bucket_order_is_preserved() {
        let queue = WorkerQueue::new("test", 1);
        let rec = Recorder::new();
        let stop = CancellationToken::new();
        let handles = queue.run(rec.clone(), stop.clone()).await;

        queue.enqueue("ns1", "Ingress/ns1/a");
        queue.enqueue("ns1", "Ingress/ns1/b");
        queue.enqueue("ns1", "Ingress/ns1/c");

        wait_for(&rec, || rec.keys().len() == 3).await;
        assert_eq!(
            rec.keys(),
            vec!["Ingress/ns1/a", "Ingress/ns1/b", "Ingress/ns1/c"]
        );

        stop.cancel();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn same_locality_maps_to_same_bucket() {
        let queue = WorkerQueue::new("test", 8);
        let idx1 = bkt("red-ns", queue.num_workers());
        let idx2 = bkt("red-ns", queue.num_workers());
        assert_eq!(idx1, idx2);
    }

    #[tokio::test]
    async fn pending_keys_are_coalesced() {
        let queue = WorkerQueue::new("test", 1);
        // Nobody draining yet: duplicates must collapse.
        queue.enqueue("ns", "Service/ns/svc");
        queue.enqueue("ns", "Service/ns/svc");
        queue.enqueue("ns", "Service/ns/svc");

        let rec = Recorder::new();
        let stop = CancellationToken::new();
        let handles = queue.run(rec.clone(), stop.clone()).await;
        wait_for(&rec, || !rec.keys().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rec.keys(), vec!["Service/ns/svc"]);

        stop.cancel();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn stop_drains_queued_keys() {
        let queue = WorkerQueue::new("test", 1);
        let rec = Recorder::new();
        let stop = CancellationToken::new();

        queue.enqueue("ns", "k1");
        queue.enqueue("ns", "k2");
        let handles = queue.run(rec.clone(), stop.clone()).await;
        stop.cancel();
        for h in handles {
            let _ = h.await;
        }
        assert_eq!(rec.keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticked_queue_drains_once_per_tick() {
        let queue = WorkerQueue::with_slow_sync("slow", 1, Duration::from_secs(1));
        let rec = Recorder::new();
        let stop = CancellationToken::new();
        let handles = queue.run(rec.clone(), stop.clone()).await;

        queue.enqueue_key("admin/c1--red-svc");
        queue.enqueue_key("admin/c1--blue-svc");

        // First tick fires immediately on interval creation; advance past
        // the next tick to pick both keys up.
        tokio::time::advance(Duration::from_millis(1100)).await;
        wait_for(&rec, || rec.keys().len() == 2).await;

        stop.cancel();
        for h in handles {
            let _ = h.await;
        }
    }
}
