//! Fan-out delivery of notices to many subscribers.
//!
//! Uses [`tokio::sync::broadcast`]. Notices are projections of state held
//! elsewhere; with no subscriber listening they are dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

/// Default channel capacity used across the workspace.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast-based notice bus.
///
/// # Examples
///
/// ```
/// use pybridge_channel::Broadcaster;
///
/// let bus = Broadcaster::<String>::new(16);
/// let mut sub = bus.subscribe();
/// bus.emit("hello".to_string());
/// assert_eq!(sub.try_recv().as_deref(), Some("hello"));
/// assert_eq!(bus.total_emitted(), 1);
/// ```
#[derive(Debug)]
pub struct Broadcaster<T> {
    sender: broadcast::Sender<T>,
    emitted: AtomicU64,
}

impl<T: Clone> Broadcaster<T> {
    /// Create a new bus with the given channel capacity.
    ///
    /// When the channel is full, the oldest notices are dropped for lagging
    /// subscribers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Send a notice to every current subscriber.
    pub fn emit(&self, value: T) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.sender.send(value);
    }

    /// Start receiving notices emitted from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Total number of notices emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving half of a [`Broadcaster`].
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Receive the next notice, waiting asynchronously.
    ///
    /// Returns `None` once the bus is gone. Lagged notices are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive a notice without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
