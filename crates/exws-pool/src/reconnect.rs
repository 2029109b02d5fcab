//! Reconnection queue.
//!
//! Reconnection attempts are serialized and throttled so a burst of
//! simultaneous closes (a server restart, a network blip) does not stampede
//! the endpoint. One drain task runs at a time; jobs enqueued mid-drain are
//! picked up by the running task or by a re-triggered one.

use crate::pool::ConnectionPool;
use crate::record::ConnectionRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct ReconnectJob {
    record: Arc<ConnectionRecord>,
    url: String,
    is_renewal: bool,
}

pub(crate) struct ReconnectQueue {
    throttle: Duration,
    jobs: Mutex<VecDeque<ReconnectJob>>,
    draining: AtomicBool,
}

impl ReconnectQueue {
    pub(crate) fn new(throttle_ms: u64) -> Self {
        Self {
            throttle: Duration::from_millis(throttle_ms),
            jobs: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    /// Queue a reconnection attempt and start draining if idle.
    pub(crate) fn enqueue(
        &self,
        pool: &ConnectionPool,
        record: Arc<ConnectionRecord>,
        url: String,
        is_renewal: bool,
    ) {
        debug!(conn_id = %record.id(), url = %url, "Queueing reconnection attempt");
        self.jobs.lock().push_back(ReconnectJob {
            record,
            url,
            is_renewal,
        });
        self.process(pool);
    }

    /// Start the drain task unless one is already running.
    fn process(&self, pool: &ConnectionPool) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = pool.clone();
        tokio::spawn(async move {
            loop {
                let job = pool.inner.reconnect.jobs.lock().pop_front();
                let Some(job) = job else { break };
                if job.record.close_initiated() {
                    debug!(
                        conn_id = %job.record.id(),
                        "Skipping reconnection for intentionally closed connection"
                    );
                    continue;
                }
                info!(conn_id = %job.record.id(), url = %job.url, "Reconnecting Websocket");
                pool.init_connect(&job.url, job.is_renewal, &job.record);
                tokio::time::sleep(pool.inner.reconnect.throttle).await;
            }
            pool.inner.reconnect.draining.store(false, Ordering::SeqCst);
            // A job enqueued between the final pop and the flag reset would
            // otherwise sit unprocessed.
            if !pool.inner.reconnect.jobs.lock().is_empty() {
                pool.inner.reconnect.process(&pool);
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.jobs.lock().len()
    }
}
