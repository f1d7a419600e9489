use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug)]
struct QueueInner {
    /// Next ticket handed out by `admit`
    next_ticket: AtomicU64,
    /// Ticket whose holder may run; only written under `abandoned`
    serving: watch::Sender<u64>,
    /// Tickets dropped before their turn, skipped when the tail reaches them
    abandoned: Mutex<BTreeSet<u64>>,
}

impl QueueInner {
    fn advance_past(&self, finished: u64) {
        let mut abandoned = self.abandoned.lock();
        let mut next = finished + 1;
        while abandoned.remove(&next) {
            next += 1;
        }
        self.serving.send_replace(next);
        trace!(finished, next, "Queue advanced");
    }

    fn abandon(&self, ticket: u64) {
        let mut abandoned = self.abandoned.lock();
        if *self.serving.borrow() == ticket {
            let mut next = ticket + 1;
            while abandoned.remove(&next) {
                next += 1;
            }
            self.serving.send_replace(next);
        } else {
            abandoned.insert(ticket);
        }
    }
}

/// Global FIFO that admits one task at a time, whatever unit it targets.
///
/// Admission is synchronous: the order of `admit`/`run_sequential` calls is
/// the execution order. A failing or panicking task still hands the turn on.
#[derive(Debug, Clone)]
pub struct SequentialQueue {
    inner: Arc<QueueInner>,
}

impl SequentialQueue {
    pub fn new() -> Self {
        let (serving, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                next_ticket: AtomicU64::new(0),
                serving,
                abandoned: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Take a place at the tail of the queue
    pub fn admit(&self) -> QueueSlot {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        QueueSlot {
            ticket,
            inner: self.inner.clone(),
            served: false,
        }
    }

    /// Run `task` once every previously admitted task has finished.
    ///
    /// The slot is taken when this is called, not when the returned future is
    /// first polled.
    pub fn run_sequential<F, T>(&self, task: F) -> impl Future<Output = T>
    where
        F: Future<Output = T>,
    {
        let slot = self.admit();
        async move {
            let _turn = slot.ready().await;
            task.await
        }
    }

    /// Slots admitted but not yet released
    pub fn pending(&self) -> u64 {
        let abandoned = self.inner.abandoned.lock();
        let serving = *self.inner.serving.borrow();
        let issued = self.inner.next_ticket.load(Ordering::SeqCst);
        issued.saturating_sub(serving).saturating_sub(abandoned.len() as u64)
    }
}

impl Default for SequentialQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A place in the queue. Await [`QueueSlot::ready`] to get the turn.
///
/// Dropping a slot before its turn gives the place up without letting later
/// slots overtake the ones in front of it.
#[derive(Debug)]
pub struct QueueSlot {
    ticket: u64,
    inner: Arc<QueueInner>,
    served: bool,
}

impl QueueSlot {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Wait for every earlier slot to be released
    pub async fn ready(mut self) -> QueueTurn {
        let ticket = self.ticket;
        let mut serving = self.inner.serving.subscribe();
        // The sender lives in `inner`, so this only returns once served
        let _ = serving.wait_for(|current| *current == ticket).await;

        self.served = true;
        QueueTurn {
            ticket,
            inner: self.inner.clone(),
        }
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if !self.served {
            trace!(ticket = self.ticket, "Queue slot abandoned");
            self.inner.abandon(self.ticket);
        }
    }
}

/// The right to run. Dropping it releases the next slot.
#[derive(Debug)]
pub struct QueueTurn {
    ticket: u64,
    inner: Arc<QueueInner>,
}

impl QueueTurn {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for QueueTurn {
    fn drop(&mut self) {
        self.inner.advance_past(self.ticket);
    }
}
