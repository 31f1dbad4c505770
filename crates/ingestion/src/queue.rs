use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex as AsyncMutex, Notify};

/// What a full queue does with the next push. Every stage boundary in
/// the pipeline defaults to `Block`; `DropOldest` is an explicit
/// per-source drop budget and every replacement is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOverflowPolicy {
    Block,
    DropOldest,
}

impl QueueOverflowPolicy {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" => Self::DropOldest,
            _ => Self::Block,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropOldest => "drop_oldest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePush {
    Enqueued { backpressured: bool },
    ReplacedOldest,
}

#[derive(Debug)]
struct QueueState<T> {
    deque: VecDeque<T>,
    closed: bool,
}

/// Bounded MPMC queue between pipeline stages. A `Block` push suspends
/// until space frees; pop suspends until an item arrives or the queue is
/// closed and drained.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    state: AsyncMutex<QueueState<T>>,
    capacity: usize,
    depth: AtomicUsize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: AsyncMutex::new(QueueState {
                deque: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity: capacity.max(1),
            depth: AtomicUsize::new(0),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Returns `None` when the queue is closed; the item is dropped.
    pub async fn push(&self, item: T, policy: QueueOverflowPolicy) -> Option<QueuePush> {
        let mut pending = Some(item);
        let mut was_backpressured = false;
        loop {
            let mut guard = self.state.lock().await;
            if guard.closed {
                return None;
            }
            if guard.deque.len() < self.capacity {
                guard
                    .deque
                    .push_back(pending.take().expect("pending item exists before enqueue"));
                self.depth.store(guard.deque.len(), Ordering::Relaxed);
                drop(guard);
                self.not_empty.notify_one();
                return Some(QueuePush::Enqueued {
                    backpressured: was_backpressured,
                });
            }

            if matches!(policy, QueueOverflowPolicy::DropOldest) {
                let _ = guard.deque.pop_front();
                guard.deque.push_back(
                    pending
                        .take()
                        .expect("pending item exists before replacement"),
                );
                self.depth.store(guard.deque.len(), Ordering::Relaxed);
                drop(guard);
                self.not_empty.notify_one();
                self.not_full.notify_one();
                return Some(QueuePush::ReplacedOldest);
            }

            was_backpressured = true;
            drop(guard);
            self.not_full.notified().await;
        }
    }

    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let mut guard = self.state.lock().await;
            if let Some(item) = guard.deque.pop_front() {
                self.depth.store(guard.deque.len(), Ordering::Relaxed);
                drop(guard);
                self.not_full.notify_one();
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            drop(guard);
            self.not_empty.notified().await;
        }
    }

    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        guard.closed = true;
        drop(guard);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}
