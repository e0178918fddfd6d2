//! Broker-mediated RPC for the till services.
//!
//! The till services talk to each other over a single AMQP broker using
//! a small request/reply protocol: requests are published to a durable
//! per-service work queue carrying the task name in the message's `type`
//! property, and replies come back on the caller's exclusive reply
//! queue, matched to their request by correlation id and carrying the
//! status code in `type`.
//!
//! The crate is split along the protocol's three roles:
//!
//! - [`Broker`]: the process-wide connection and its channels/queues.
//! - [`RpcClient`]: publishes tasks and demultiplexes correlated replies.
//! - [`Worker`]: consumes a work queue and dispatches to a [`TaskHandler`].

use std::time::Duration;

pub mod rpc;
mod task;
pub mod transport;
pub mod worker;

pub use rpc::{
    Reply,
    RpcClient,
};
pub use task::TaskKind;
pub use transport::Broker;
pub use worker::{
    Response,
    TaskHandler,
    Worker,
};

/// Default bound on how long an RPC caller waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("broker i/o failed")]
    Amqp(#[from] lapin::Error),
    #[error("timed out after {0:?} waiting for a reply")]
    ReplyTimeout(Duration),
    #[error("reply consumer went away before delivering a reply")]
    ReplyLost,
}
