// Copyright 2024 Oxide Computer Company

use crossbeam_channel::{Receiver, Sender};

/// An MPMC queue carrying `T` with explicit shutdown. A `None` popped off the
/// channel is the shutdown sentinel: it is never reordered ahead of items
/// pushed before it, since everything rides the same channel, and a worker
/// that observes it exits its loop without processing further.
#[derive(Clone)]
pub struct BlockingQueue<T> {
    tx: Sender<Option<T>>,
    rx: Receiver<Option<T>>,
}

impl<T> BlockingQueue<T> {
    pub fn unbounded() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub fn push(&self, item: T) {
        let _ = self.tx.send(Some(item));
    }

    /// Pushes the shutdown sentinel. Safe to call more than once and from
    /// more than one thread; every blocked popper is released.
    pub fn shutdown(&self) {
        let _ = self.tx.send(None);
    }

    /// Blocks until an item or the shutdown sentinel arrives. `None` means
    /// shutdown was observed and the caller should exit its loop.
    pub fn pop(&self) -> Option<T> {
        match self.rx.recv() {
            Ok(item) => item,
            Err(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
