//! Main-thread dispatch.
//!
//! Transport callbacks fire on whatever thread the relay client uses. They
//! must not touch session state directly; instead they enqueue a
//! [`SessionEvent`] through a [`DispatchHandle`], and the logic tick drains
//! the queue in arrival order. This queue is the only synchronization point:
//! session state itself is owned by the tick.

use tokio::sync::mpsc;

use crate::session::SessionEvent;

/// Cloneable producer side, safe to move into transport callbacks.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl DispatchHandle {
    /// Queues an event for the next tick. Never blocks; returns false if the
    /// owning queue has been dropped.
    pub fn enqueue(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Single-consumer queue owned by the logic thread.
#[derive(Debug)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Takes every event queued so far, FIFO, without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
