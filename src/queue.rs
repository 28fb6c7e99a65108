//! The admission queue: a bounded FIFO of pending connections between the accept loop
//! and the session workers.
//!
//! This is a thin layer over a crossbeam [`bounded`] channel. The channel provides both
//! counting permits: a sender blocks while all `capacity` slots are filled and a receiver
//! blocks until an item is present, so neither side ever polls. Each item is handed to
//! exactly one receiver.
//!
//! [`bounded`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/fn.bounded.html
use crate::protocol::ConnectRequest;
use crate::{KvsError, Result};
use crossbeam::channel::{self, select, Receiver, Sender, TrySendError};
use tracing::debug;

/// creates an admission queue holding at most `capacity` pending connections
pub fn bounded(capacity: usize) -> (AdmissionSender, AdmissionReceiver) {
    let (tx, rx) = channel::bounded(capacity);
    (AdmissionSender { tx }, AdmissionReceiver { rx })
}

/// The producing end of the admission queue, owned by the accept loop
#[derive(Debug, Clone)]
pub struct AdmissionSender {
    tx: Sender<ConnectRequest>,
}

impl AdmissionSender {
    /// appends `request` to the queue, blocking while the queue is full
    ///
    /// # Errors
    /// returns [`KvsError::QueueClosed`] if every receiver is gone
    pub fn enqueue(&self, request: ConnectRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| KvsError::QueueClosed)?;
        debug!(pending = self.tx.len(), "connection admitted");
        Ok(())
    }

    /// Appends `request` like [`enqueue`], unless `cancel` receives a message (or is closed)
    /// while the queue is full.
    ///
    /// Returns `Ok(false)` when cancelled, the request is then dropped.
    ///
    /// # Errors
    /// returns [`KvsError::QueueClosed`] if every receiver is gone
    ///
    /// [`enqueue`]: AdmissionSender::enqueue
    pub fn enqueue_unless(&self, request: ConnectRequest, cancel: &Receiver<()>) -> Result<bool> {
        select! {
            send(self.tx, request) -> sent => {
                sent.map_err(|_| KvsError::QueueClosed)?;
                debug!(pending = self.tx.len(), "connection admitted");
                Ok(true)
            }
            recv(cancel) -> _ => {
                debug!("admission cancelled");
                Ok(false)
            }
        }
    }

    /// appends `request` only if a slot is free right now.
    /// Gives the request back when the queue is full or closed.
    pub fn try_enqueue(&self, request: ConnectRequest) -> std::result::Result<(), ConnectRequest> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(r) | TrySendError::Disconnected(r) => r,
        })
    }

    /// number of connections waiting for a session
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// true if no connection is waiting
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// The consuming end of the admission queue, cloned into every session worker
#[derive(Debug, Clone)]
pub struct AdmissionReceiver {
    rx: Receiver<ConnectRequest>,
}

impl AdmissionReceiver {
    /// removes the oldest pending connection, blocking until one arrives.
    ///
    /// Returns `None` once the queue is empty and every sender has been dropped.
    pub fn dequeue(&self) -> Option<ConnectRequest> {
        self.rx.recv().ok()
    }
}
