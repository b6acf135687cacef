//! End-to-end routing: inbound messages reach session threads through the
//! dispatcher, and sessions answer over their blocking channels.

use corrflow_core::{
    CommChannel, CommMessage, CorrelationEngine, Delivery, ExecutionContext, InboundDispatcher,
    MemoryTransport, ProcessConfig, Session, SessionLauncher, Value,
};
use crossbeam_channel::{Receiver, Sender};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const QUOTE_SERVICE: &str = r#"
execution: concurrent
starters: [openQuote]
correlation_sets:
  - name: quote
    operations:
      openQuote:
        - { session: quote.id, message: reqId }
      getQuote:
        - { session: quote.id, message: reqId }
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("corrflow_core=debug")
        .with_test_writer()
        .try_init();
}

/// Runs each session on its own thread: answers every queued request, then
/// completes once it has answered `getQuote` and reports its final state.
struct QuoteLauncher {
    engine: Arc<CorrelationEngine>,
    done: Sender<Value>,
}

impl SessionLauncher for QuoteLauncher {
    fn launch(&self, session: Arc<Session>) -> anyhow::Result<()> {
        let engine = self.engine.clone();
        let done = self.done.clone();
        std::thread::Builder::new()
            .name(format!("session-{}", session.id()))
            .spawn(move || {
                let _ctx = ExecutionContext::for_session(session.id()).enter();
                while let Some(inbound) = session.next_message_timeout(Duration::from_secs(5)) {
                    let (request, channel) = inbound.into_parts();
                    let reply = match request.operation() {
                        "openQuote" => {
                            let id = session.state().first_child("quote").first_child("id");
                            json!({ "quoteId": id.int_value() })
                        }
                        _ => json!({ "price": 42 }),
                    };
                    channel
                        .send(CommMessage::response(&request, Value::from_json(&reply)))
                        .expect("reply");
                    if request.operation() == "getQuote" {
                        engine.on_session_executed(&session);
                        break;
                    }
                }
                let _ = done.send(session.state().create_clone());
            })?;
        Ok(())
    }
}

struct Harness {
    runtime: tokio::runtime::Runtime,
    dispatcher: InboundDispatcher,
    done: Receiver<Value>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let config = Arc::new(ProcessConfig::from_yaml_str(QUOTE_SERVICE).unwrap());
        let engine = Arc::new(CorrelationEngine::new(config));
        let (tx, done) = crossbeam_channel::unbounded();
        let launcher = Arc::new(QuoteLauncher {
            engine: engine.clone(),
            done: tx,
        });
        Self {
            runtime,
            dispatcher: InboundDispatcher::new(engine, launcher),
            done,
        }
    }

    fn connection(&self) -> (Arc<MemoryTransport>, Arc<CommChannel>) {
        let transport = Arc::new(MemoryTransport::new());
        let channel = CommChannel::new(
            "mem://client",
            transport.clone(),
            self.runtime.handle().clone(),
        );
        (transport, channel)
    }

    fn request(op: &str, req_id: i64) -> CommMessage {
        CommMessage::request(op, "/", Value::from_json(&json!({ "reqId": req_id })))
    }
}

fn wait_for_writes(transport: &MemoryTransport, n: usize) -> Vec<CommMessage> {
    for _ in 0..500 {
        let written = transport.written();
        if written.len() >= n {
            return written;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("transport saw {} writes, wanted {n}", transport.written().len());
}

#[test]
fn test_quote_conversation_reaches_one_session() {
    let h = Harness::new();
    let (transport, channel) = h.connection();

    let open = Harness::request("openQuote", 7);
    let open_id = open.id();
    let started = h.dispatcher.deliver(open, channel.clone()).unwrap();
    assert!(matches!(started, Delivery::Started(_)));

    let get = Harness::request("getQuote", 7);
    let get_id = get.id();
    assert_eq!(h.dispatcher.deliver(get, channel).unwrap(), Delivery::Routed);

    let replies = wait_for_writes(&transport, 2);
    assert_eq!(replies[0].id(), open_id);
    assert_eq!(replies[0].value().to_json(), json!({ "quoteId": 7 }));
    assert_eq!(replies[1].id(), get_id);
    assert_eq!(replies[1].value().first_child("price").int_value(), 42);

    let finished = h.done.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.first_child("quote").first_child("id").int_value(), 7);
    assert_eq!(h.dispatcher.engine().live_sessions(), 0);
}

#[test]
fn test_concurrent_sessions_are_kept_apart() {
    let h = Harness::new();
    let (transport, channel) = h.connection();

    for id in [1, 2, 3] {
        h.dispatcher
            .deliver(Harness::request("openQuote", id), channel.clone())
            .unwrap();
    }
    wait_for_writes(&transport, 3);
    assert_eq!(h.dispatcher.engine().live_sessions(), 3);

    h.dispatcher
        .deliver(Harness::request("getQuote", 2), channel.clone())
        .unwrap();
    let finished = h.done.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.first_child("quote").first_child("id").int_value(), 2);
    assert_eq!(h.dispatcher.engine().live_sessions(), 2);
}

#[test]
fn test_completed_session_no_longer_receives() {
    let h = Harness::new();
    let (_transport, channel) = h.connection();

    h.dispatcher
        .deliver(Harness::request("openQuote", 9), channel.clone())
        .unwrap();
    h.dispatcher
        .deliver(Harness::request("getQuote", 9), channel.clone())
        .unwrap();
    h.done.recv_timeout(Duration::from_secs(5)).unwrap();

    let err = h
        .dispatcher
        .deliver(Harness::request("getQuote", 9), channel)
        .unwrap_err();
    assert_eq!(err.code(), "DELIVERY_UNEXPECTED_MESSAGE");
}
