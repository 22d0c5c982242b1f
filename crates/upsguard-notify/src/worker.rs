//! Notifier handle and the FIFO persistent-retry worker task.
//!
//! Enqueue never blocks beyond the channel send. The worker delivers
//! one message at a time: a message is retried until the sink
//! acknowledges it, and the next message is not attempted before
//! then. Head-of-line blocking during an outage is intentional: the
//! event narrative must arrive in causal order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::message::{Message, Priority};
use crate::sink::NotifySink;

/// Cloneable producer handle. Dropping every clone closes the queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Message>,
    seq: Arc<AtomicU64>,
    depth: Arc<AtomicUsize>,
}

impl Notifier {
    pub fn enqueue(&self, priority: Priority, body: impl Into<String>) {
        self.enqueue_message(priority, None, body.into());
    }

    pub fn enqueue_titled(
        &self,
        priority: Priority,
        title: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.enqueue_message(priority, Some(title.into()), body.into());
    }

    fn enqueue_message(&self, priority: Priority, title: Option<String>, body: String) {
        let msg = Message {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            priority,
            title,
            body,
            enqueued_at: Utc::now(),
        };
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(msg).is_err() {
            // Worker already stopped; the message is lost by design.
            self.depth.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("notification dropped: worker not running");
        }
    }

    /// Messages enqueued but not yet acknowledged by the sink.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Owns the worker task. Construction starts the worker; shutdown
/// drains it for a bounded time.
pub struct NotifyService {
    notifier: Notifier,
    depth: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl NotifyService {
    /// Start the worker task delivering through `sink`.
    pub fn start<S: NotifySink + 'static>(sink: S, retry_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier {
            tx,
            seq: Arc::new(AtomicU64::new(1)),
            depth: Arc::clone(&depth),
        };
        let worker_depth = Arc::clone(&depth);
        let handle = tokio::spawn(run_worker(sink, rx, worker_depth, retry_interval));
        Self {
            notifier,
            depth,
            handle,
        }
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Close the queue and wait up to `deadline` for the worker to
    /// deliver what remains. Undelivered messages are logged and lost.
    pub async fn drain(self, deadline: Duration) {
        let Self {
            notifier,
            depth,
            mut handle,
        } = self;
        drop(notifier);
        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(_) => tracing::info!("notification queue drained"),
            Err(_elapsed) => {
                let remaining = depth.load(Ordering::Relaxed);
                tracing::warn!(remaining, "notification drain timed out; abandoning queue");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

async fn run_worker<S: NotifySink>(
    sink: S,
    mut rx: mpsc::UnboundedReceiver<Message>,
    depth: Arc<AtomicUsize>,
    retry_interval: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if sink.send(&msg).await {
                break;
            }
            tracing::warn!(
                seq = msg.seq,
                attempt,
                "notification delivery failed; retrying in {}s",
                retry_interval.as_secs()
            );
            tokio::time::sleep(retry_interval).await;
        }
        depth.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(seq = msg.seq, attempt, "notification delivered");
    }
}

// ─── Tests ────────────────────────────────────────────────────────
