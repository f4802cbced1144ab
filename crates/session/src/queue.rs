//! Bounded drop-oldest microphone queue
//!
//! Keeps end-to-end latency bounded under sustained overload: when the
//! recognizer leg stalls, the oldest frames are sacrificed so the freshest
//! audio is what eventually reaches it. Frame order is preserved across
//! drops.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One queued entry; `None` is the shutdown sentinel.
type Slot = Option<Vec<u8>>;

pub struct InputQueue {
    slots: Mutex<VecDeque<Slot>>,
    notify: Notify,
    depth: usize,
}

impl InputQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            slots: Mutex::new(VecDeque::with_capacity(depth + 1)),
            notify: Notify::new(),
            depth,
        }
    }

    /// Enqueue without blocking; beyond capacity the oldest frame is dropped
    /// to make room.
    pub fn push(&self, frame: Vec<u8>) {
        {
            let mut slots = self.slots.lock();
            if slots.len() >= self.depth {
                tracing::debug!("input queue full, dropping oldest frame");
                slots.pop_front();
            }
            slots.push_back(Some(frame));
        }
        self.notify.notify_one();
    }

    /// Enqueue the shutdown sentinel. The sentinel is never dropped.
    pub fn shutdown(&self) {
        self.slots.lock().push_back(None);
        self.notify.notify_one();
    }

    /// Dequeue the next frame; `None` means shutdown.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            if let Some(slot) = self.slots.lock().pop_front() {
                return slot;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
