//! Per-viewer outbound queue.
//!
//! The hub pushes into one queue per viewer and never waits on it; a slow
//! viewer loses its oldest frames instead of holding up everyone else.
//! Viewer-count updates are only dropped when a queue holds nothing else.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use emu_session::Frame;
use tokio::sync::Notify;

/// A message bound for one viewer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    ViewerCount(usize),
}

struct Inner {
    items: VecDeque<Outbound>,
    closed: bool,
}

/// Bounded single-consumer queue with drop-oldest overflow
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without blocking. Returns `false` if the queue is closed.
    pub fn push(&self, msg: Outbound) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            if inner.items.len() >= self.capacity {
                let victim = inner
                    .items
                    .iter()
                    .position(|m| matches!(m, Outbound::Frame(_)))
                    .unwrap_or(0);
                inner.items.remove(victim);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.items.push_back(msg);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next message. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(msg) = inner.items.pop_front() {
                    return Some(msg);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, discarding anything still pending.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
            inner.items.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
