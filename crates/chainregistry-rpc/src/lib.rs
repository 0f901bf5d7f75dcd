//! chainregistry-rpc — supervised ledger connection and contract reads.
//!
//! # Overview
//!
//! - [`ConnectionSupervisor`]: owns the one logical connection to the node;
//!   watchdog + heartbeat tasks detect drops and reconnect
//! - [`ChainReader`]: stateless calls through whatever transport the
//!   supervisor currently holds
//! - [`LedgerTransport`] / [`Connector`]: the transport seam; [`NodeConnector`]
//!   pairs a WebSocket client (subscriptions) with an optional HTTP client (calls)
//! - [`abi`]: calldata encoding, return decoding and keccak selectors
//! - [`RetryPolicy`]: exponential or linear backoff

pub mod abi;
pub mod connector;
pub mod error;
pub mod http;
pub mod reader;
pub mod request;
pub mod retry;
pub mod subscriptions;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod ws;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use abi::ViewFunction;
pub use connector::{NodeConnection, NodeConnector};
pub use error::TransportError;
pub use reader::{ChainReader, ReaderConfig};
pub use retry::{Backoff, RetryConfig, RetryPolicy};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorHandle};
pub use transport::{Connector, LedgerTransport, LogStream};
pub use types::{BlockSummary, BlockTag, LogFilter, RawLog};
