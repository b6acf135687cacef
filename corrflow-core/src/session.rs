use crate::message::{Fault, SessionMessage};
use crate::path::PathScope;
use crate::value::Value;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Faulted { fault: String },
}

impl SessionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// The operation whose message caused a session to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStarter {
    operation: String,
}

impl SessionStarter {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// One running instance of the process: its state tree and inbound queue.
///
/// The state tree is written by the session's own execution context and
/// only read by the correlation engine.
pub struct Session {
    id: SessionId,
    state: Value,
    inbox_tx: Sender<SessionMessage>,
    inbox_rx: Receiver<SessionMessage>,
    status: Mutex<SessionStatus>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_state(Value::new())
    }

    pub fn with_state(state: Value) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            id: SessionId::new(),
            state,
            inbox_tx,
            inbox_rx,
            status: Mutex::new(SessionStatus::Running),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Root of the session state tree.
    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Move to a terminal status. The first terminal status wins.
    pub(crate) fn finish(&self, fault: Option<&Fault>) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_finished() {
            return false;
        }
        *status = match fault {
            Some(f) => SessionStatus::Faulted {
                fault: f.name().to_string(),
            },
            None => SessionStatus::Completed,
        };
        true
    }

    /// Enqueue a routed message. Never blocks.
    pub fn push_message(&self, message: SessionMessage) {
        // The session owns the receiver, so the queue cannot be disconnected.
        let _ = self.inbox_tx.send(message);
    }

    /// Block until a message is routed to this session.
    pub fn next_message(&self) -> Option<SessionMessage> {
        self.inbox_rx.recv().ok()
    }

    pub fn next_message_timeout(&self, timeout: Duration) -> Option<SessionMessage> {
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_next_message(&self) -> Option<SessionMessage> {
        self.inbox_rx.try_recv().ok()
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox_rx.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl PathScope for Session {
    fn root(&self) -> Value {
        self.state.clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("pending", &self.pending_messages())
            .finish()
    }
}
