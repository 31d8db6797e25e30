//! Real-time delivery: who is connected, how a message finds their socket,
//! and the per-connection task that drains it there.

pub mod bridge;
pub mod connection;
pub mod error;
pub mod exchange;
pub mod registry;
pub mod topic;
pub mod transport;

pub use error::{FanoutError, TransportError};
pub use exchange::{Exchange, Fanout, Subscription};
pub use registry::{ConnectionRegistry, LiveConnection};
