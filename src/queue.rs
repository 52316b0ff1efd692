//! Serializes concurrent watch notifications into a strictly ordered stream
//! consumed by the certificate manager.

use tokio::sync::{mpsc, watch};

use crate::{Event, Resource, cert};

pub const DEFAULT_BUFFER: usize = 128;

/// Creates the enqueue side and the consumer loop around a manager. The
/// channel holds up to `buffer` events; enqueueing blocks beyond that, which
/// is the intended backpressure on the watch layer.
pub fn new(manager: cert::Manager, buffer: usize) -> (Queue, Runner) {
    let (tx, rx) = mpsc::channel(buffer);
    (Queue { tx }, Runner { rx, manager })
}

/// The enqueue side. Clonable; events from all clones share one FIFO.
#[derive(Clone)]
pub struct Queue {
    tx: mpsc::Sender<Event>,
}

impl Queue {
    pub async fn on_add(&self, obj: Resource) {
        let _ = self.tx.send(Event::Add(obj)).await;
    }

    pub async fn on_update(&self, old: Resource, new: Resource) {
        let _ = self.tx.send(Event::Update(old, new)).await;
    }

    pub async fn on_delete(&self, obj: Resource) {
        let _ = self.tx.send(Event::Delete(obj)).await;
    }
}

/// The single consumer. Owns the manager; nothing else mutates it.
pub struct Runner {
    rx: mpsc::Receiver<Event>,
    manager: cert::Manager,
}

impl Runner {
    /// Delivers events one at a time, in arrival order, until the stop
    /// channel fires (still-enqueued events are dropped) or every enqueue
    /// handle is gone (the queue is drained first).
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                event = self.rx.recv() => {
                    let Some(event) = event else { return };
                    self.manager.handle(event).await;
                }
            }
        }
    }
}
