//! Inbound delivery: what a listener does with each decoded message.
//!
//! Route to a live session if one correlates; otherwise start a new session
//! when the operation is a session starter; otherwise report the message as
//! unexpected.

use crate::channel::CommChannel;
use crate::config::ExecutionMode;
use crate::correlation::{CorrelationEngine, CorrelationError};
use crate::message::{CommMessage, Fault, SessionMessage};
use crate::session::{Session, SessionId, SessionStarter};
use crate::value::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Runs a newly registered session on its own execution context.
///
/// Implementations typically spawn a thread that enters an
/// [`ExecutionContext`](crate::context::ExecutionContext) for the session,
/// drains its inbox and reports completion back to the engine.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, session: Arc<Session>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on an existing session.
    Routed,
    /// A new session was started with the message queued on it.
    Started(SessionId),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unexpected message for operation '{operation}'")]
    UnexpectedMessage { operation: String },

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("failed to launch session {session_id}: {source}")]
    Launch {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedMessage { .. } => "DELIVERY_UNEXPECTED_MESSAGE",
            Self::Correlation(e) => e.code(),
            Self::Launch { .. } => "DELIVERY_LAUNCH_FAILED",
        }
    }
}

pub struct InboundDispatcher {
    engine: Arc<CorrelationEngine>,
    launcher: Arc<dyn SessionLauncher>,
}

impl InboundDispatcher {
    pub fn new(engine: Arc<CorrelationEngine>, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self { engine, launcher }
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// Dispatch one decoded message arriving on `channel`.
    pub fn deliver(
        &self,
        message: CommMessage,
        channel: Arc<CommChannel>,
    ) -> Result<Delivery, DeliveryError> {
        if self.engine.route_message(&message, &channel)? {
            return Ok(Delivery::Routed);
        }

        let config = self.engine.config();
        if config.execution_mode() == ExecutionMode::Single
            || !config.is_starter(message.operation())
        {
            warn!(
                operation = message.operation(),
                message_id = message.id(),
                channel_id = %channel.id(),
                "unexpected message"
            );
            return Err(DeliveryError::UnexpectedMessage {
                operation: message.operation().to_string(),
            });
        }

        let session = Arc::new(Session::new());
        let starter = SessionStarter::new(message.operation());
        self.engine
            .on_session_start(&session, &starter, Some(&message));
        session.push_message(SessionMessage::new(message, channel));
        self.launch(session).map(Delivery::Started)
    }

    /// Register and launch the one session of a single-instance process.
    pub fn start_single_session(&self, state: Value) -> Result<Arc<Session>, DeliveryError> {
        let session = Arc::new(Session::with_state(state));
        self.engine.on_single_execution_session_start(&session);
        self.launch(session.clone())?;
        Ok(session)
    }

    fn launch(&self, session: Arc<Session>) -> Result<SessionId, DeliveryError> {
        let session_id = session.id();
        if let Err(source) = self.launcher.launch(session.clone()) {
            self.engine
                .on_session_error(&session, &Fault::new("SessionLaunchFailed"));
            return Err(DeliveryError::Launch { session_id, source });
        }
        info!(%session_id, "session launched");
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrelationPair, CorrelationSet, ProcessConfig};
    use crate::transport_memory::MemoryTransport;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records launched sessions instead of running them.
    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<Arc<Session>>>,
        fail: bool,
    }

    impl SessionLauncher for RecordingLauncher {
        fn launch(&self, session: Arc<Session>) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("no threads left");
            }
            self.launched.lock().unwrap().push(session);
            Ok(())
        }
    }

    fn config() -> Arc<ProcessConfig> {
        let pair = CorrelationPair::new("id".parse().unwrap(), "reqId".parse().unwrap());
        Arc::new(
            ProcessConfig::new(ExecutionMode::Concurrent)
                .with_starter("openQuote")
                .with_correlation_set(
                    CorrelationSet::new("quote")
                        .with_operation("openQuote", vec![pair.clone()])
                        .with_operation("getQuote", vec![pair]),
                )
                .unwrap(),
        )
    }

    fn fixture(fail: bool) -> (tokio::runtime::Runtime, Arc<RecordingLauncher>, InboundDispatcher) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let launcher = Arc::new(RecordingLauncher {
            fail,
            ..Default::default()
        });
        let engine = Arc::new(CorrelationEngine::new(config()));
        let dispatcher = InboundDispatcher::new(engine, launcher.clone());
        (rt, launcher, dispatcher)
    }

    fn channel(rt: &tokio::runtime::Runtime) -> Arc<CommChannel> {
        CommChannel::new("mem://in", Arc::new(MemoryTransport::new()), rt.handle().clone())
    }

    fn msg(op: &str, req_id: i64) -> CommMessage {
        CommMessage::request(op, "/", Value::from_json(&json!({ "reqId": req_id })))
    }

    #[test]
    fn test_starter_creates_session_then_routes() {
        let (rt, launcher, dispatcher) = fixture(false);

        let started = dispatcher.deliver(msg("openQuote", 5), channel(&rt)).unwrap();
        let Delivery::Started(id) = started else {
            panic!("expected a new session, got {started:?}");
        };
        let session = launcher.launched.lock().unwrap()[0].clone();
        assert_eq!(session.id(), id);
        assert_eq!(session.state().first_child("id").int_value(), 5);
        assert_eq!(session.pending_messages(), 1);

        let routed = dispatcher.deliver(msg("getQuote", 5), channel(&rt)).unwrap();
        assert_eq!(routed, Delivery::Routed);
        assert_eq!(session.pending_messages(), 2);
    }

    #[test]
    fn test_non_starter_without_match_is_unexpected() {
        let (rt, launcher, dispatcher) = fixture(false);
        let err = dispatcher
            .deliver(msg("getQuote", 1), channel(&rt))
            .unwrap_err();
        assert_eq!(err.code(), "DELIVERY_UNEXPECTED_MESSAGE");
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert_eq!(dispatcher.engine().live_sessions(), 0);
    }

    #[test]
    fn test_unbound_operation_propagates_once_sessions_are_live() {
        let (rt, _launcher, dispatcher) = fixture(false);
        let err = dispatcher
            .deliver(msg("mystery", 1), channel(&rt))
            .unwrap_err();
        assert_eq!(err.code(), "DELIVERY_UNEXPECTED_MESSAGE");

        dispatcher.deliver(msg("openQuote", 1), channel(&rt)).unwrap();
        let err = dispatcher
            .deliver(msg("mystery", 1), channel(&rt))
            .unwrap_err();
        assert_eq!(err.code(), "CORRELATION_UNBOUND_OPERATION");
    }

    fn dispatcher_for(config: ProcessConfig) -> (Arc<RecordingLauncher>, InboundDispatcher) {
        let launcher = Arc::new(RecordingLauncher::default());
        let engine = Arc::new(CorrelationEngine::new(Arc::new(config)));
        let dispatcher = InboundDispatcher::new(engine, launcher.clone());
        (launcher, dispatcher)
    }

    #[test]
    fn test_unbound_starter_starts_a_session_each_time() {
        let (rt, _, _) = fixture(false);
        let subscribe = CorrelationPair::new("id".parse().unwrap(), "id".parse().unwrap());
        let config = ProcessConfig::new(ExecutionMode::Concurrent)
            .with_starter("login")
            .with_correlation_set(
                CorrelationSet::new("subs").with_operation("subscribe", vec![subscribe]),
            )
            .unwrap();
        let (launcher, dispatcher) = dispatcher_for(config);

        let first = dispatcher.deliver(msg("login", 1), channel(&rt)).unwrap();
        assert!(matches!(first, Delivery::Started(_)));

        // A live session does not capture the next login.
        let second = dispatcher.deliver(msg("login", 1), channel(&rt)).unwrap();
        assert!(matches!(second, Delivery::Started(_)));
        assert_ne!(first, second);
        assert_eq!(launcher.launched.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.engine().live_sessions(), 2);
    }

    #[test]
    fn test_concurrent_service_without_correlation_sets() {
        let (rt, _, _) = fixture(false);
        let (launcher, dispatcher) =
            dispatcher_for(ProcessConfig::new(ExecutionMode::Concurrent).with_starter("op"));

        for _ in 0..3 {
            let delivery = dispatcher.deliver(msg("op", 0), channel(&rt)).unwrap();
            assert!(matches!(delivery, Delivery::Started(_)));
        }
        assert_eq!(launcher.launched.lock().unwrap().len(), 3);
        assert!(launcher
            .launched
            .lock()
            .unwrap()
            .iter()
            .all(|s| s.pending_messages() == 1));
    }

    #[test]
    fn test_launch_failure_unregisters_session() {
        let (rt, _launcher, dispatcher) = fixture(true);
        let err = dispatcher
            .deliver(msg("openQuote", 9), channel(&rt))
            .unwrap_err();
        assert_eq!(err.code(), "DELIVERY_LAUNCH_FAILED");
        assert_eq!(dispatcher.engine().live_sessions(), 0);
    }

    #[test]
    fn test_single_session_takes_everything() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let engine = Arc::new(CorrelationEngine::new(Arc::new(ProcessConfig::new(
            ExecutionMode::Single,
        ))));
        let dispatcher = InboundDispatcher::new(engine, launcher.clone());

        let session = dispatcher.start_single_session(Value::new()).unwrap();
        for op in ["a", "b", "c"] {
            assert_eq!(
                dispatcher.deliver(msg(op, 0), channel(&rt)).unwrap(),
                Delivery::Routed
            );
        }
        assert_eq!(session.pending_messages(), 3);
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    }
}
