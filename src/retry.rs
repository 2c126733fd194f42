//! Retry layers and backoff utilities
//!
//! Failed models re-enter the REST layer on one of two paths: the fast
//! layer re-admits immediately but charges the graph's bounded retry
//! counter, demoting persistent failures to the slow layer, whose queue
//! drains once per [`crate::SLOW_SYNC_TIME`] tick. Full sync resets every
//! counter so recovered controllers get a clean budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::graph::lister::GraphLister;
use crate::queue::{QueueHandler, WorkerQueue};
use crate::FAST_RETRY_LIMIT;

/// Fast-retry worker: immediate re-admission with a bounded budget.
pub struct FastRetryLayer {
    lister: Arc<GraphLister>,
    rest_queue: Arc<WorkerQueue>,
    slow_retry_queue: Arc<WorkerQueue>,
}

impl FastRetryLayer {
    /// Wire the layer up.
    pub fn new(
        lister: Arc<GraphLister>,
        rest_queue: Arc<WorkerQueue>,
        slow_retry_queue: Arc<WorkerQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lister,
            rest_queue,
            slow_retry_queue,
        })
    }

    /// Re-admit one model, demoting it once the budget is spent.
    pub fn dequeue_fast_retry(&self, model_name: &str) {
        if let Some(Some(graph)) = self.lister.get(model_name) {
            let attempts = graph.incr_retry_counter();
            if attempts > FAST_RETRY_LIMIT {
                warn!(
                    model = %model_name,
                    attempts,
                    "Fast retry budget exhausted, demoting to slow retry"
                );
                self.slow_retry_queue.enqueue_key(model_name);
                return;
            }
            debug!(model = %model_name, attempts, "Fast retry re-admission");
        }
        self.rest_queue.enqueue_key(model_name);
    }
}

#[async_trait]
impl QueueHandler for FastRetryLayer {
    async fn sync(&self, key: String) -> crate::Result<()> {
        self.dequeue_fast_retry(&key);
        Ok(())
    }
}

/// Slow-retry worker: its queue is drained once per tick by the queue
/// runtime; each drained model goes straight back to the REST layer.
pub struct SlowRetryLayer {
    rest_queue: Arc<WorkerQueue>,
}

impl SlowRetryLayer {
    /// Wire the layer up.
    pub fn new(rest_queue: Arc<WorkerQueue>) -> Arc<Self> {
        Arc::new(Self { rest_queue })
    }
}

#[async_trait]
impl QueueHandler for SlowRetryLayer {
    async fn sync(&self, key: String) -> crate::Result<()> {
        debug!(model = %key, "Slow retry re-admission");
        self.rest_queue.enqueue_key(key);
        Ok(())
    }
}

/// Configuration for operations that may fail transiently.
///
/// Used for out-of-pipeline calls (auth-token refresh, secret updates)
/// that retry with exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts.
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Jitter spreads retries across 0.5x-1.5x of the nominal delay so a
/// controller outage does not produce a synchronized stampede.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AviVsNode, GraphRoot, ObjectGraph};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn live_graph(model: &str) -> Arc<ObjectGraph> {
        Arc::new(ObjectGraph::new(
            model,
            Some(GraphRoot::Vs(AviVsNode {
                name: "c1--m".to_string(),
                ..Default::default()
            })),
        ))
    }

    #[test]
    fn fast_retry_demotes_after_the_budget() {
        let lister = GraphLister::new();
        let rest = WorkerQueue::new("rest-test", 1);
        let slow = WorkerQueue::new("slow-test", 1);
        let layer = FastRetryLayer::new(Arc::clone(&lister), rest, slow);

        let graph = live_graph("admin/c1--m");
        lister.save("admin/c1--m", Some(Arc::clone(&graph)));

        for _ in 0..FAST_RETRY_LIMIT {
            layer.dequeue_fast_retry("admin/c1--m");
        }
        assert_eq!(graph.retry_counter(), FAST_RETRY_LIMIT);
        // The next attempt crosses the limit and demotes.
        layer.dequeue_fast_retry("admin/c1--m");
        assert_eq!(graph.retry_counter(), FAST_RETRY_LIMIT + 1);
    }

    #[test]
    fn deleted_models_still_retry() {
        let lister = GraphLister::new();
        let rest = WorkerQueue::new("rest-test", 1);
        let slow = WorkerQueue::new("slow-test", 1);
        let layer = FastRetryLayer::new(Arc::clone(&lister), rest, slow);
        lister.save("admin/gone", None);
        // No graph to count on; the model re-enters the REST queue anyway.
        layer.dequeue_fast_retry("admin/gone");
    }

    #[tokio::test]
    async fn backoff_succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        };
        let result: Result<u32, &str> = retry_with_backoff(&config, "op", || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_exhausts_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        };
        let result: Result<u32, &str> =
            retry_with_backoff(&config, "op", || async { Err("always") }).await;
        assert_eq!(result, Err("always"));
    }
}
