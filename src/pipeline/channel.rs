//! Latest-value hand-off between the capture worker and the update loop.
//!
//! Both ends are non-blocking. The publisher keeps a receiver of its own so
//! it can evict stale values instead of waiting for the consumer.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// What the publisher does with values the consumer has not read yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eviction {
    /// Drop only as many of the oldest values as needed to make room.
    OldestWhenFull,
    /// Clear every queued value before inserting the new one.
    All,
}

pub struct LatestSender<T> {
    tx: Sender<T>,
    evict_rx: Receiver<T>,
    eviction: Eviction,
}

#[derive(Clone)]
pub struct LatestReceiver<T> {
    rx: Receiver<T>,
}

pub fn latest<T>(capacity: usize, eviction: Eviction) -> (LatestSender<T>, LatestReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        LatestSender {
            tx,
            evict_rx: rx.clone(),
            eviction,
        },
        LatestReceiver { rx },
    )
}

impl<T> LatestSender<T> {
    pub fn publish(&self, value: T) {
        if self.eviction == Eviction::All {
            while self.evict_rx.try_recv().is_ok() {}
        }

        let mut value = value;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    // The consumer may drain concurrently; either way there is room next round.
                    let _ = self.evict_rx.try_recv();
                    value = rejected;
                }
                // Cannot happen while we hold `evict_rx`, but never block on it.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(1)
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict_rx: self.evict_rx.clone(),
            eviction: self.eviction,
        }
    }
}

impl<T> LatestReceiver<T> {
    /// Drains everything queued and keeps the newest value.
    pub fn latest(&self) -> Option<T> {
        let mut newest = self.rx.try_recv().ok()?;
        while let Ok(newer) = self.rx.try_recv() {
            newest = newer;
        }
        Some(newest)
    }

    /// Takes the oldest queued value, if any.
    #[cfg(test)]
    pub fn try_next(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
