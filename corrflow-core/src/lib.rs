//! Core of a service-oriented process engine.
//!
//! This crate provides the pieces that sit between a transport listener and
//! the sessions of a running service:
//! - `Value` / `ValueVector` - the shared, mutable value tree sessions and
//!   messages carry, including vectors linked to a path in another tree
//! - `CorrelationEngine` - routes each inbound message to the one live
//!   session whose correlation values match it
//! - `CommChannel` - a blocking request/response endpoint over an async
//!   `Transport`
//! - `InboundDispatcher` - routes, starts new sessions, or rejects a message
//!
//! Sessions run on their own threads and block on channel I/O; transport
//! work runs on a tokio runtime handed to each channel.

pub mod channel;
pub mod config;
pub mod context;
pub mod correlation;
pub mod delivery;
pub mod json;
pub mod message;
pub mod path;
pub mod session;
pub mod transport_memory;
pub mod value;
pub mod vector;

pub use channel::{ChannelError, CommChannel, Transport};
pub use config::{
    ConfigError, CorrelationPair, CorrelationSet, EqualityMode, ExecutionMode, ProcessConfig,
};
pub use context::ExecutionContext;
pub use correlation::{CorrelationEngine, CorrelationError};
pub use delivery::{Delivery, DeliveryError, InboundDispatcher, SessionLauncher};
pub use message::{CommMessage, Fault, SessionMessage};
pub use path::{PathError, PathScope, VariablePath};
pub use session::{Session, SessionId, SessionStarter, SessionStatus};
pub use transport_memory::MemoryTransport;
pub use value::{Scalar, Value};
pub use vector::ValueVector;
