//! Blocking per-session channel over an asynchronous transport.
//!
//! Sessions run on their own OS threads and call the blocking `receive`,
//! `send` and `close`. The transport runtime delivers decoded messages
//! through the async `complete_read`. The two sides meet at a per-channel
//! read slot:
//!
//! ```text
//! session thread                       transport task
//! ──────────────                       ──────────────
//! receive():                           complete_read(msg):
//!   slot.waiter = Some(tx)               loop {
//!   notify_waiters()          ───────►     if let Some(tx) = slot.waiter.take()
//!   rx.blocking_recv()        ◄───────       { tx.send(msg); return }
//!                                          notified.await
//!                                        }
//! ```
//!
//! Blocking entry points must not be called from inside the transport
//! runtime.

use crate::context::ExecutionContext;
use crate::message::CommMessage;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("a receive is already pending on this channel")]
    ReceivePending,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Closed => "CHANNEL_CLOSED",
            Self::ReceivePending => "CHANNEL_RECEIVE_PENDING",
            Self::Transport(_) => "CHANNEL_TRANSPORT",
        }
    }

    /// Transport faults may succeed on a fresh channel; the others will not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// The asynchronous write side of a connection. Framing and encoding happen
/// behind this trait; the channel only hands over whole messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve once the transport has accepted the message.
    async fn write(&self, message: CommMessage) -> std::io::Result<()>;

    async fn close(&self) -> std::io::Result<()>;
}

type ReadResult = Result<CommMessage, ChannelError>;

#[derive(Default)]
struct ReadSlot {
    waiter: Option<oneshot::Sender<ReadResult>>,
    closed: bool,
}

pub struct CommChannel {
    id: Uuid,
    location: String,
    context: Option<ExecutionContext>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    slot: Mutex<ReadSlot>,
    slot_ready: Notify,
    closed: watch::Sender<bool>,
}

impl CommChannel {
    /// Create a channel bound to the execution context current on this
    /// thread. Transport futures run on `runtime`.
    pub fn new(
        location: impl Into<String>,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::now_v7(),
            location: location.into(),
            context: ExecutionContext::current(),
            transport,
            runtime,
            slot: Mutex::new(ReadSlot::default()),
            slot_ready: Notify::new(),
            closed,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// The execution context that created this channel.
    pub fn context(&self) -> Option<ExecutionContext> {
        self.context
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn lock_slot(&self) -> MutexGuard<'_, ReadSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a `receive` is waiting for its message.
    pub fn has_pending_receive(&self) -> bool {
        self.lock_slot().waiter.is_some()
    }

    // ── Read side ──

    /// Block until the transport delivers the next message for this channel.
    ///
    /// Fails immediately with [`ChannelError::ReceivePending`] if another
    /// receive is outstanding, and with [`ChannelError::Closed`] once the
    /// channel is closed.
    pub fn receive(&self) -> Result<CommMessage, ChannelError> {
        let rx = {
            let mut slot = self.lock_slot();
            if slot.closed {
                return Err(ChannelError::Closed);
            }
            if slot.waiter.is_some() {
                return Err(ChannelError::ReceivePending);
            }
            let (tx, rx) = oneshot::channel();
            slot.waiter = Some(tx);
            rx
        };
        self.slot_ready.notify_waiters();

        // A dropped sender means the slot was torn down without a message.
        rx.blocking_recv().unwrap_or(Err(ChannelError::Closed))
    }

    /// Hand a decoded message to the pending `receive`, waiting for one to
    /// be issued if necessary. Each call fulfils exactly one receive.
    ///
    /// Only fails if the channel is closed before a receive picks the
    /// message up.
    pub async fn complete_read(&self, message: CommMessage) -> Result<(), ChannelError> {
        let mut message = message;
        loop {
            let notified = self.slot_ready.notified();
            let waiter = {
                let mut slot = self.lock_slot();
                if slot.closed {
                    warn!(
                        channel_id = %self.id,
                        message_id = message.id(),
                        "inbound message arrived on closed channel"
                    );
                    return Err(ChannelError::Closed);
                }
                slot.waiter.take()
            };

            match waiter {
                Some(tx) => match tx.send(Ok(message)) {
                    Ok(()) => return Ok(()),
                    // The receiving thread went away; keep the message for
                    // the next receive.
                    Err(returned) => {
                        message = match returned {
                            Ok(m) => m,
                            Err(e) => return Err(e),
                        };
                    }
                },
                None => notified.await,
            }
        }
    }

    // ── Write side ──

    /// Write `message` and wait for the transport to accept it.
    pub async fn send_async(&self, message: CommMessage) -> Result<(), ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ChannelError::Closed);
        }
        let message_id = message.id();
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(ChannelError::Closed),
            written = self.transport.write(message) => {
                written.map_err(|e| {
                    warn!(channel_id = %self.id, message_id, error = %e, "transport write failed");
                    ChannelError::from(e)
                })
            }
        }
    }

    /// Blocking [`CommChannel::send_async`]: the caller is held until the
    /// transport acknowledges the write, so a slow transport throttles it.
    pub fn send(&self, message: CommMessage) -> Result<(), ChannelError> {
        self.runtime.block_on(self.send_async(message))
    }

    // ── Teardown ──

    /// Close the channel. Pending and future `receive`/`send` calls fail with
    /// [`ChannelError::Closed`]. Closing twice is a no-op.
    pub async fn close_async(&self) -> Result<(), ChannelError> {
        let waiter = {
            let mut slot = self.lock_slot();
            if slot.closed {
                return Ok(());
            }
            slot.closed = true;
            slot.waiter.take()
        };
        if let Some(tx) = waiter {
            let _ = tx.send(Err(ChannelError::Closed));
        }
        self.closed.send_replace(true);
        self.slot_ready.notify_waiters();
        debug!(channel_id = %self.id, location = %self.location, "channel closed");

        self.transport.close().await.map_err(ChannelError::from)
    }

    pub fn close(&self) -> Result<(), ChannelError> {
        self.runtime.block_on(self.close_async())
    }
}

impl fmt::Debug for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommChannel")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("closed", &self.is_closed())
            .finish()
    }
}
