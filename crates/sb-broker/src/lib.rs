//! Session multiplexer / broker
//!
//! Maps many concurrent network clients onto the single upstream child:
//! correlates responses by rewritten JSON-RPC id, broadcasts notifications,
//! answers discovery from the local catalog, and applies the filter chain
//! in both directions.

pub mod broker;
pub mod catalog;
pub mod registry;
pub mod session;

pub use broker::{Broker, BrokerOptions};
pub use catalog::Catalog;
pub use registry::{PendingRequest, RequestRegistry};
pub use session::{ClientInfo, QueuePush, Session, SessionStore, Sink, SinkKind, SinkMessage};
