use crate::channel::CommChannel;
use crate::config::{EqualityMode, ExecutionMode, ProcessConfig};
use crate::message::{CommMessage, Fault, SessionMessage};
use crate::session::{Session, SessionId, SessionStarter};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A live session of a multi-session process was offered a non-starter
    /// operation that no correlation set binds. This is a configuration
    /// defect, not a routing outcome.
    #[error("operation '{operation}' has no correlation set")]
    UnboundOperation { operation: String },
}

impl CorrelationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnboundOperation { .. } => "CORRELATION_UNBOUND_OPERATION",
        }
    }
}

/// Registry of live sessions and the message-to-session matcher.
///
/// Every registry access (the routing scan and the three lifecycle calls)
/// runs under one mutex. The scan visits sessions in unspecified order and
/// delivers to the first match; if the correlation rules let two sessions
/// match the same message, which one wins is not defined.
///
/// Matching only reads session and message trees. Paths that run through a
/// linked field are followed without creating the link's target.
pub struct CorrelationEngine {
    config: Arc<ProcessConfig>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl CorrelationEngine {
    pub fn new(config: Arc<ProcessConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Arc<ProcessConfig> {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single-instance processes without correlation sets have one implicit
    /// session that takes every message.
    fn correlates_trivially(&self) -> bool {
        self.config.execution_mode() == ExecutionMode::Single
            && !self.config.has_correlation_sets()
    }

    /// Outcome for an operation no correlation set binds. Starters and
    /// single-instance processes treat it as a non-match; anything else is a
    /// configuration defect.
    fn unbound(&self, message: &CommMessage) -> Result<bool, CorrelationError> {
        if self.config.execution_mode() == ExecutionMode::Single
            || self.config.is_starter(message.operation())
        {
            return Ok(false);
        }
        error!(
            operation = message.operation(),
            "no correlation set bound to operation; configuration defect"
        );
        Err(CorrelationError::UnboundOperation {
            operation: message.operation().to_string(),
        })
    }

    /// Deliver `message` to the first live session it correlates with.
    ///
    /// `Ok(false)` means no session matched and nothing changed; the caller
    /// decides whether to start a session. `Err` only signals a live session
    /// being offered a non-starter operation that no correlation set binds.
    pub fn route_message(
        &self,
        message: &CommMessage,
        channel: &Arc<CommChannel>,
    ) -> Result<bool, CorrelationError> {
        let sessions = self.registry();
        for session in sessions.values() {
            if self.matches(session, message)? {
                debug!(
                    session_id = %session.id(),
                    operation = message.operation(),
                    message_id = message.id(),
                    "message correlated"
                );
                session.push_message(SessionMessage::new(message.clone(), channel.clone()));
                return Ok(true);
            }
        }

        debug!(
            operation = message.operation(),
            message_id = message.id(),
            live_sessions = sessions.len(),
            "no session correlates"
        );
        Ok(false)
    }

    /// Whether `message` correlates with `session`.
    pub fn correlate(
        &self,
        session: &Session,
        message: &CommMessage,
    ) -> Result<bool, CorrelationError> {
        self.matches(session, message)
    }

    fn matches(
        &self,
        session: &Session,
        message: &CommMessage,
    ) -> Result<bool, CorrelationError> {
        if self.correlates_trivially() {
            return Ok(true);
        }

        let Some(pairs) = self
            .config
            .correlation_set_for(message.operation())
            .and_then(|set| set.pairs_for(message.operation()))
        else {
            return self.unbound(message);
        };

        Ok(pairs.iter().all(|pair| {
            let Some(session_value) = pair.session_path.find_value(session.state()) else {
                return false;
            };
            let Some(message_value) = pair.message_path.find_value(message.value()) else {
                return false;
            };
            session_value.is_defined()
                && message_value.is_defined()
                && self.values_equal(&session_value, &message_value)
        }))
    }

    fn values_equal(&self, session_value: &Value, message_value: &Value) -> bool {
        match self.config.equality() {
            EqualityMode::Loose => session_value.loose_eq(message_value),
            EqualityMode::Strict => session_value.strict_eq(message_value),
        }
    }

    /// Register a session created by `starter` and seed its correlation
    /// values from the starting message.
    pub fn on_session_start(
        &self,
        session: &Arc<Session>,
        starter: &SessionStarter,
        message: Option<&CommMessage>,
    ) {
        let mut sessions = self.registry();
        if session.is_finished() {
            warn!(session_id = %session.id(), "refusing to register a finished session");
            return;
        }
        sessions.insert(session.id(), session.clone());
        if let Some(message) = message {
            self.init_correlation_values(session, starter, message);
        }
        info!(
            session_id = %session.id(),
            starter = starter.operation(),
            live_sessions = sessions.len(),
            "session started"
        );
    }

    /// Register the implicit session of a single-instance process.
    pub fn on_single_execution_session_start(&self, session: &Arc<Session>) {
        let mut sessions = self.registry();
        if session.is_finished() {
            warn!(session_id = %session.id(), "refusing to register a finished session");
            return;
        }
        sessions.insert(session.id(), session.clone());
        info!(session_id = %session.id(), "single-execution session started");
    }

    pub fn on_session_executed(&self, session: &Session) {
        let mut sessions = self.registry();
        sessions.remove(&session.id());
        session.finish(None);
        info!(
            session_id = %session.id(),
            live_sessions = sessions.len(),
            "session completed"
        );
    }

    pub fn on_session_error(&self, session: &Session, fault: &Fault) {
        let mut sessions = self.registry();
        sessions.remove(&session.id());
        session.finish(Some(fault));
        warn!(
            session_id = %session.id(),
            fault = fault.name(),
            live_sessions = sessions.len(),
            "session faulted"
        );
    }

    fn init_correlation_values(
        &self,
        session: &Session,
        starter: &SessionStarter,
        message: &CommMessage,
    ) {
        let Some(pairs) = self
            .config
            .correlation_set_for(starter.operation())
            .and_then(|set| set.pairs_for(starter.operation()))
        else {
            return;
        };
        for pair in pairs {
            match pair.message_path.find_value(message.value()) {
                Some(source) if source.is_defined() => {
                    pair.session_path.value_in(session.state()).assign(&source);
                }
                _ => debug!(
                    session_id = %session.id(),
                    path = %pair.message_path,
                    "starter message lacks correlation value"
                ),
            }
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.registry().len()
    }

    pub fn is_live(&self, id: SessionId) -> bool {
        self.registry().contains_key(&id)
    }
}
