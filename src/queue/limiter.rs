//! Concurrency limiter with minimum spacing between call starts
//!
//! Callers enqueue a ticket and wait for a slot. A single dispatch task
//! hands slots out in FIFO order, holding each grant back until a
//! concurrency permit is free and `min_time` has passed since the previous
//! call start. A slot is returned when its guard drops, which happens when
//! the scheduled task finishes or its caller goes away.
//!
//! A task that makes several calls inside one slot claims each extra start
//! through [`ConcurrencyLimiter::pace`], so the spacing holds per call.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::error::{AppError, Result};

/// A queued request for a slot
struct LimiterTicket {
    slot_tx: oneshot::Sender<LimiterSlot>,
}

/// A granted slot; frees its permit and active count on drop
struct LimiterSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for LimiterSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time limiter state for the health surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    /// Tasks waiting for a slot
    pub queued: usize,
    /// Tasks currently holding a slot
    pub active: usize,
    pub concurrency: usize,
    pub min_time_ms: u64,
    /// Slots granted since startup
    pub dispatched: u64,
}

/// Start clock shared by slot grants and in-slot calls
struct Pacer {
    min_time: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Wait until `min_time` has passed since the last claimed start, then
    /// claim the current instant
    async fn claim_start(&self) {
        loop {
            let ready_at = {
                let mut last_start = self.last_start.lock();
                let now = Instant::now();
                match *last_start {
                    Some(previous) if previous + self.min_time > now => previous + self.min_time,
                    _ => {
                        *last_start = Some(now);
                        return;
                    }
                }
            };
            trace!(
                wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                "Spacing next call start"
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }
}

/// Bounded-concurrency FIFO task limiter
pub struct ConcurrencyLimiter {
    ticket_tx: mpsc::UnboundedSender<LimiterTicket>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    dispatched: Arc<AtomicU64>,
    pacer: Arc<Pacer>,
    concurrency: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter and spawn its dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(concurrency: usize, min_time: Duration) -> Self {
        let concurrency = concurrency.max(1);
        let (ticket_tx, ticket_rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let dispatched = Arc::new(AtomicU64::new(0));
        let pacer = Arc::new(Pacer {
            min_time,
            last_start: Mutex::new(None),
        });

        let dispatch = Dispatch {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            queued: queued.clone(),
            active: active.clone(),
            dispatched: dispatched.clone(),
            pacer: pacer.clone(),
        };
        tokio::spawn(dispatch.run(ticket_rx));

        Self {
            ticket_tx,
            queued,
            active,
            dispatched,
            pacer,
            concurrency,
        }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.concurrency, config.min_time())
    }

    /// Run `task` once a slot is available.
    ///
    /// Tasks start in submission order. The limiter never retries; the
    /// task's own output is returned unchanged.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (slot_tx, slot_rx) = oneshot::channel();

        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.ticket_tx.send(LimiterTicket { slot_tx }).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::LimiterClosed("dispatch task stopped".to_string()));
        }

        let slot = slot_rx
            .await
            .map_err(|_| AppError::LimiterClosed("slot was never granted".to_string()))?;

        let output = task().await;
        drop(slot);
        Ok(output)
    }

    /// Claim a call start inside an already granted slot.
    ///
    /// Resolves once `min_time` has passed since the previous start, by
    /// this task or any other.
    pub async fn pace(&self) {
        self.pacer.claim_start().await;
    }

    pub fn min_time(&self) -> Duration {
        self.pacer.min_time
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            queued: self.queued.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            concurrency: self.concurrency,
            min_time_ms: self.pacer.min_time.as_millis() as u64,
            dispatched: self.dispatched.load(Ordering::SeqCst),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// State owned by the dispatch task
struct Dispatch {
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    dispatched: Arc<AtomicU64>,
    pacer: Arc<Pacer>,
}

impl Dispatch {
    async fn run(self, mut ticket_rx: mpsc::UnboundedReceiver<LimiterTicket>) {
        while let Some(ticket) = ticket_rx.recv().await {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if !ticket.slot_tx.is_closed() {
                self.pacer.claim_start().await;
            }
            self.queued.fetch_sub(1, Ordering::SeqCst);

            if ticket.slot_tx.is_closed() {
                debug!("Dropping ticket abandoned by its caller");
                continue;
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let slot = LimiterSlot {
                _permit: permit,
                active: self.active.clone(),
            };

            let count = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(dispatched = count, "Granted limiter slot");

            // A caller that vanished after the check above hands the slot
            // straight back through its drop
            let _ = ticket.slot_tx.send(slot);
        }
    }
}
