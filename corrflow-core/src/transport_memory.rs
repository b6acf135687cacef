use crate::channel::Transport;
use crate::message::CommMessage;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Semaphore;

/// In-memory Transport for testing and embedding.
///
/// Records every accepted message. A gated transport holds each write until
/// [`MemoryTransport::release`] grants an acknowledgement, which makes
/// backpressure observable.
pub struct MemoryTransport {
    written: Mutex<Vec<CommMessage>>,
    gate: Option<Semaphore>,
    fail_next: Mutex<Option<io::ErrorKind>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Writes are acknowledged immediately.
    pub fn new() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            gate: None,
            fail_next: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Writes wait for [`MemoryTransport::release`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Acknowledge up to `n` pending or future writes.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Make the next write fail with `kind`.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    pub fn written(&self) -> Vec<CommMessage> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn write(&self, message: CommMessage) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        let injected = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(kind) = injected {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"))?
                .forget();
        }
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Some(gate) = &self.gate {
            gate.close();
        }
        Ok(())
    }
}
