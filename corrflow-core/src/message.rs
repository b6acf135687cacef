use crate::channel::CommChannel;
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A fresh process-unique request id.
pub fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A named fault carried by a response, or raised by a session.
#[derive(Clone, Debug)]
pub struct Fault {
    name: String,
    value: Value,
}

impl Fault {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::new(),
        }
    }

    pub fn with_value(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// An inbound or outbound message. Fields are fixed at construction.
#[derive(Clone, Debug)]
pub struct CommMessage {
    id: u64,
    operation: String,
    resource_path: String,
    value: Value,
    fault: Option<Fault>,
}

impl CommMessage {
    /// A new request with a fresh id.
    pub fn request(
        operation: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            id: next_message_id(),
            operation: operation.into(),
            resource_path: resource_path.into(),
            value,
            fault: None,
        }
    }

    /// A successful response to `request`, sharing its id.
    pub fn response(request: &CommMessage, value: Value) -> Self {
        Self {
            id: request.id,
            operation: request.operation.clone(),
            resource_path: request.resource_path.clone(),
            value,
            fault: None,
        }
    }

    /// A fault response to `request`, sharing its id.
    pub fn fault_response(request: &CommMessage, fault: Fault) -> Self {
        Self {
            id: request.id,
            operation: request.operation.clone(),
            resource_path: request.resource_path.clone(),
            value: Value::new(),
            fault: Some(fault),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// A message routed to a session, with the channel it arrived on.
#[derive(Clone, Debug)]
pub struct SessionMessage {
    message: CommMessage,
    channel: Arc<CommChannel>,
}

impl SessionMessage {
    pub fn new(message: CommMessage, channel: Arc<CommChannel>) -> Self {
        Self { message, channel }
    }

    pub fn message(&self) -> &CommMessage {
        &self.message
    }

    pub fn channel(&self) -> &Arc<CommChannel> {
        &self.channel
    }

    pub fn into_parts(self) -> (CommMessage, Arc<CommChannel>) {
        (self.message, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = CommMessage::request("op", "/", Value::new());
        let b = CommMessage::request("op", "/", Value::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_response_keeps_request_identity() {
        let req = CommMessage::request("getQuote", "/quotes", Value::from(1i64));
        let resp = CommMessage::response(&req, Value::from(99i64));
        assert_eq!(resp.id(), req.id());
        assert_eq!(resp.operation(), "getQuote");
        assert_eq!(resp.resource_path(), "/quotes");
        assert!(!resp.is_fault());

        let fault = CommMessage::fault_response(&req, Fault::new("QuoteUnavailable"));
        assert_eq!(fault.id(), req.id());
        assert_eq!(fault.fault().map(Fault::name), Some("QuoteUnavailable"));
    }
}
