//! Admission-controlled execution of research runs.
//!
//! A fixed set of workers drains one FIFO backlog. Admission is decided up
//! front against `pool size + queue capacity`, so a submission either gets a
//! slot immediately or is rejected as busy; it never waits.

use crate::timeline::EventPublisher;
use crate::types::{AppError, EventKind, Result};
use crate::utils::toml_config::ExecutorConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

struct Job {
    research_id: String,
    task: BoxFuture<'static, ()>,
}

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// True when a worker was free at submission time
    pub starts_now: bool,
    /// Runs ahead of this one in the backlog
    pub queue_position: usize,
    pub estimated_start: DateTime<Utc>,
}

impl Admission {
    pub fn estimated_start_hhmm(&self) -> String {
        self.estimated_start.format("%H:%M").to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecutorStats {
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub running: usize,
    pub queued: usize,
}

pub struct ResearchTaskExecutor {
    tx: mpsc::UnboundedSender<Job>,
    /// Held across reserve and enqueue so backlog order matches queue positions
    admission: parking_lot::Mutex<()>,
    in_flight: Arc<AtomicUsize>,
    config: ExecutorConfig,
    publisher: Arc<EventPublisher>,
}

impl ResearchTaskExecutor {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn new(config: ExecutorConfig, publisher: Arc<EventPublisher>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let pool_size = config.max_pool_size.max(1);

        for worker in 0..pool_size {
            let rx = Arc::clone(&rx);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    info!(worker, research_id = %job.research_id, "Run started");
                    if AssertUnwindSafe(job.task).catch_unwind().await.is_err() {
                        error!(worker, research_id = %job.research_id, "Run panicked");
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        info!(
            pool_size,
            queue_capacity = config.queue_capacity,
            "Research executor started"
        );

        Self {
            tx,
            admission: parking_lot::Mutex::new(()),
            in_flight,
            config,
            publisher,
        }
    }

    fn pool_size(&self) -> usize {
        self.config.max_pool_size.max(1)
    }

    fn capacity(&self) -> usize {
        self.pool_size() + self.config.queue_capacity
    }

    /// Reserve a slot, or report how many were in flight when full.
    fn reserve(&self) -> std::result::Result<usize, usize> {
        let capacity = self.capacity();
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < capacity).then_some(current + 1)
            })
    }

    /// Start estimate for a run admitted while `ahead` runs were in flight.
    pub fn estimate(&self, ahead: usize, now: DateTime<Utc>) -> Admission {
        let pool = self.pool_size();
        if ahead < pool {
            return Admission {
                starts_now: true,
                queue_position: 0,
                estimated_start: now,
            };
        }

        let queue_depth = ahead - pool;
        let rounds = (queue_depth + 1).div_ceil(pool) as i64;
        let wait = ChronoDuration::minutes(rounds * self.config.task_timeout_minutes as i64);
        Admission {
            starts_now: false,
            queue_position: queue_depth + 1,
            estimated_start: now + wait,
        }
    }

    /// Admit a run. Rejects with [`AppError::Busy`] when the backlog is full.
    pub async fn submit<F>(&self, research_id: &str, task: F) -> Result<Admission>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job {
            research_id: research_id.to_string(),
            task: task.boxed(),
        };
        let ahead = {
            let _order = self.admission.lock();
            let ahead = match self.reserve() {
                Ok(ahead) => ahead,
                Err(in_flight) => {
                    warn!(research_id, in_flight, "Backlog full, rejecting run");
                    return Err(AppError::Busy(format!(
                        "all {} workers busy and {} runs queued, try again later",
                        self.pool_size(),
                        self.config.queue_capacity
                    )));
                }
            };
            if self.tx.send(job).is_err() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Internal("executor workers have stopped".to_string()));
            }
            ahead
        };

        let admission = self.estimate(ahead, Utc::now());
        let notice = if admission.starts_now {
            "Starting research now".to_string()
        } else {
            format!(
                "Queued at position {}, estimated start {}",
                admission.queue_position,
                admission.estimated_start_hhmm()
            )
        };
        self.publisher
            .publish_temp_event(research_id, EventKind::Queue, &notice)
            .await;

        info!(research_id, queue_position = admission.queue_position, "Run admitted");
        Ok(admission)
    }

    pub fn stats(&self) -> ExecutorStats {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let pool = self.pool_size();
        ExecutorStats {
            pool_size: pool,
            queue_capacity: self.config.queue_capacity,
            running: in_flight.min(pool),
            queued: in_flight.saturating_sub(pool),
        }
    }
}
