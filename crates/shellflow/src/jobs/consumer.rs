use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::jobs::lifecycle::LifecycleManager;
use crate::jobs::store::QueueStore;

/// The two named backoffs of the poll loop: how long to sleep when every
/// tier is empty, and how long after an unexpected queue error.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    pub idle_interval: Duration,
    pub error_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            error_interval: Duration::from_secs(5),
        }
    }
}

/// Sequential queue consumer: one job in flight per worker instance.
/// Horizontal throughput comes from running more instances, which coordinate
/// only through the atomic pops of the shared queue store.
pub struct Consumer {
    queue: Arc<dyn QueueStore>,
    lifecycle: LifecycleManager,
    config: ConsumerConfig,
    shutdown: CancellationToken,
    worker_id: String,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        lifecycle: LifecycleManager,
        config: ConsumerConfig,
        shutdown: CancellationToken,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            lifecycle,
            config,
            shutdown,
            worker_id,
        }
    }

    /// Poll until the shutdown token fires. Transient store errors back off
    /// and continue; nothing short of shutdown stops the loop.
    pub async fn run(&self) {
        println!("[{}] consumer loop started", self.worker_id);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.queue.pop_next().await {
                Ok(Some(payload)) => {
                    if let Err(e) = self.lifecycle.dispatch(&payload).await {
                        eprintln!("[{}] dispatch error: {e:#}", self.worker_id);
                        self.pause(self.config.error_interval).await;
                    }
                }
                Ok(None) => {
                    self.pause(self.config.idle_interval).await;
                }
                Err(e) => {
                    eprintln!("[{}] queue error: {e:#}", self.worker_id);
                    self.pause(self.config.error_interval).await;
                }
            }
        }

        println!("[{}] consumer loop stopped", self.worker_id);
    }

    async fn pause(&self, interval: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
