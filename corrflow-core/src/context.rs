//! Execution-context marker for the current thread.
//!
//! A session's thread enters its context before running; channels created
//! while it is active remember it so transport events can later be
//! attributed to that session.

use crate::session::SessionId;
use std::cell::Cell;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    id: Uuid,
    session: Option<SessionId>,
}

thread_local! {
    static CURRENT: Cell<Option<ExecutionContext>> = const { Cell::new(None) };
}

impl ExecutionContext {
    pub fn for_session(session: SessionId) -> Self {
        Self {
            id: Uuid::now_v7(),
            session: Some(session),
        }
    }

    /// A context not tied to any session (e.g. a service's init code).
    pub fn detached() -> Self {
        Self {
            id: Uuid::now_v7(),
            session: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// The context entered on this thread, if any.
    pub fn current() -> Option<ExecutionContext> {
        CURRENT.with(Cell::get)
    }

    /// Make this the current context until the guard drops.
    pub fn enter(self) -> ContextGuard {
        let previous = CURRENT.with(|c| c.replace(Some(self)));
        ContextGuard { previous }
    }
}

/// Restores the previously current context on drop.
#[must_use = "the context is left as soon as the guard drops"]
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}
