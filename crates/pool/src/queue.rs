//! Global FIFO of admitted tasks and the dispatch loop that feeds the pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tabgate_core_types::{GatewayError, GatewayResult, GenerateOutput, GenerateRequest};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::{ExecuteOutcome, Pool};

struct PendingTask {
    request: GenerateRequest,
    reply: oneshot::Sender<GatewayResult<GenerateOutput>>,
    enqueued_at: Instant,
}

/// Single global FIFO across all models.
///
/// Dispatch scans head-to-tail and starts the first task that has an idle
/// candidate, so a task whose candidates are all busy can be overtaken by a
/// later task with an idle one — throughput over strict arrival order.
pub struct AdmissionQueue {
    pool: Arc<Pool>,
    pending: Mutex<VecDeque<PendingTask>>,
    notify: Notify,
    queue_buffer: usize,
    accepting: AtomicBool,
    shutdown: CancellationToken,
}

impl AdmissionQueue {
    pub fn new(pool: Arc<Pool>, queue_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            pool,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_buffer,
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn queued(&self) -> usize {
        self.pending.lock().len()
    }

    /// Capacity for non-streaming admission: worker count plus the buffer.
    pub fn capacity(&self) -> usize {
        self.pool.worker_count() + self.queue_buffer
    }

    /// Enqueue an admitted task.
    ///
    /// Non-streaming requests are refused when in-flight plus queued reach
    /// capacity. Streaming requests always admit — the keepalive channel
    /// makes an unbounded wait safe from the client's perspective — but wait
    /// their turn like everyone else.
    pub fn submit(
        &self,
        request: GenerateRequest,
    ) -> GatewayResult<oneshot::Receiver<GatewayResult<GenerateOutput>>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(GatewayError::server_busy());
        }
        if !request.meta.stream {
            let load = self.pool.in_flight() + self.queued();
            if load >= self.capacity() {
                return Err(GatewayError::server_busy());
            }
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().push_back(PendingTask {
            request,
            reply: reply_tx,
            enqueued_at: Instant::now(),
        });
        self.notify.notify_one();
        Ok(reply_rx)
    }

    /// Run the dispatch loop until shutdown.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                queue.drain();
                tokio::select! {
                    _ = queue.shutdown.cancelled() => break,
                    _ = queue.notify.notified() => {}
                }
            }
            info!("admission dispatcher stopped");
        })
    }

    /// One pass over the queue: drop cancelled tasks, fail unroutable ones,
    /// start every task that has an idle candidate.
    fn drain(self: &Arc<Self>) {
        let mut to_run = Vec::new();
        let mut to_fail = Vec::new();
        {
            let mut pending = self.pending.lock();
            let mut index = 0;
            while index < pending.len() {
                let task = &pending[index];
                if task.request.cancel.is_cancelled() {
                    // The client is gone; the reply receiver is dropped with it.
                    let task = pending.remove(index).expect("indexed task");
                    debug!(task = %task.request.meta.task_id, "dropping cancelled task from queue");
                    continue;
                }
                match self
                    .pool
                    .candidates(&task.request.model_key, task.request.has_images())
                {
                    Err(err) => {
                        let task = pending.remove(index).expect("indexed task");
                        to_fail.push((task, err));
                        continue;
                    }
                    Ok(candidates) => {
                        let dispatchable = candidates
                            .iter()
                            .any(|w| w.is_initialized() && w.busy() == 0);
                        if dispatchable {
                            let task = pending.remove(index).expect("indexed task");
                            to_run.push(task);
                            continue;
                        }
                    }
                }
                index += 1;
            }
        }

        for (task, err) in to_fail {
            let _ = task.reply.send(Err(err));
        }
        for task in to_run {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_task(task).await;
            });
        }
    }

    async fn run_task(self: Arc<Self>, task: PendingTask) {
        let waited = task.enqueued_at.elapsed();
        debug!(
            task = %task.request.meta.task_id,
            waited_ms = waited.as_millis() as u64,
            "task leaves the queue"
        );
        match self.pool.try_execute(&task.request).await {
            ExecuteOutcome::Completed(result) => {
                // Exactly one response or one error per admitted task; a
                // dropped receiver just means the client went away.
                let _ = task.reply.send(result);
            }
            ExecuteOutcome::AllBusy => {
                // Lost the race for the worker; back to the head.
                self.pending.lock().push_front(task);
            }
        }
        self.notify.notify_one();
    }

    /// Stop accepting new admissions; queued and in-flight tasks finish.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.stop_accepting();
        self.shutdown.cancel();
        self.notify.notify_one();
    }
}
