//! Ordered hand-off from the network worker to the control loop.
//!
//! The worker enqueues without ever blocking; the control loop drains every
//! queued item once per tick, so replies are only ever handled on the
//! control side, between state transitions.

use tokio::sync::mpsc;

pub fn channel<T>() -> (Enqueuer<T>, Dispatcher<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Enqueuer { tx }, Dispatcher { rx })
}

#[derive(Clone)]
pub struct Enqueuer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Enqueuer<T> {
    /// Returns false once the dispatcher has been dropped.
    pub fn enqueue(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }
}

pub struct Dispatcher<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Dispatcher<T> {
    /// Hand every queued item to `handle` in arrival order and return how
    /// many were processed. Items enqueued while draining are included.
    pub fn drain(&mut self, mut handle: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Ok(item) = self.rx.try_recv() {
            handle(item);
            count += 1;
        }
        count
    }
}
