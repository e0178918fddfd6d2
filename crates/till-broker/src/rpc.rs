//! The client half of the broker RPC protocol.
//!
//! An [`RpcClient`] owns one channel and one exclusive reply queue. Any
//! number of calls may be in flight on it concurrently; replies are
//! demultiplexed purely by correlation id through a shared
//! [`ReplyRouter`]: publishing registers a one-shot slot under a fresh
//! UUID, and the reply-consumer task fulfills the slot when the matching
//! reply arrives. Each call owns its slot, so there is no shared
//! response state between callers.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use futures::StreamExt as _;
use lapin::{
    options::{
        BasicConsumeOptions,
        BasicPublishOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Consumer,
};
use tokio::sync::oneshot;
use tracing::{
    debug,
    instrument,
    warn,
};
use uuid::Uuid;

use crate::{
    transport,
    Broker,
    Error,
    TaskKind,
};

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A worker's answer to a single RPC call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// HTTP-like status code parsed from the reply's `type` property.
    pub status: u16,
    /// Raw reply body; text or JSON depending on the task.
    pub body: Vec<u8>,
}

impl Reply {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body rendered as text, for error propagation to HTTP callers.
    #[must_use]
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Routes replies to the callers waiting on their correlation ids.
///
/// At most one waiter exists per correlation id: ids are freshly drawn
/// UUIDs and the slot is removed on fulfillment, cancellation, and
/// timeout alike. A reply arriving for an id with no slot (late, after
/// its caller timed out) is dropped.
#[derive(Default)]
pub(crate) struct ReplyRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl ReplyRouter {
    pub(crate) fn register(&self, correlation_id: String) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("no task panics while holding the pending lock")
            .insert(correlation_id, tx);
        rx
    }

    pub(crate) fn cancel(&self, correlation_id: &str) {
        self.pending
            .lock()
            .expect("no task panics while holding the pending lock")
            .remove(correlation_id);
    }

    /// Fulfills the slot registered under `correlation_id`, returning
    /// `false` if no caller is waiting for it.
    pub(crate) fn route(&self, correlation_id: &str, reply: Reply) -> bool {
        let Some(slot) = self
            .pending
            .lock()
            .expect("no task panics while holding the pending lock")
            .remove(correlation_id)
        else {
            return false;
        };
        // A send error means the caller was dropped between timing out
        // and cancelling its slot; the reply is discarded either way.
        slot.send(reply).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending
            .lock()
            .expect("no task panics while holding the pending lock")
            .len()
    }
}

/// Publishes tasks to one work queue and awaits correlated replies.
pub struct RpcClient {
    channel: Channel,
    queue: String,
    reply_queue: String,
    router: Arc<ReplyRouter>,
    reply_timeout: Duration,
    consumer_task: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Binds a client to `queue` on a fresh channel of `broker`.
    ///
    /// Declares the exclusive reply queue and spawns the task that
    /// consumes it (auto-ack) for the lifetime of the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel, queue, or consumer cannot be
    /// set up.
    pub async fn bind(broker: &Broker, queue: &str, reply_timeout: Duration) -> Result<Self, Error> {
        let channel = broker.open_channel().await?;
        let reply_queue = transport::declare_reply_queue(&channel).await?;
        let consumer = channel
            .basic_consume(
                &reply_queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let router = Arc::new(ReplyRouter::default());
        let consumer_task = tokio::spawn(route_replies(consumer, router.clone()));

        debug!(queue, reply_queue, "bound rpc client");

        Ok(Self {
            channel,
            queue: queue.to_string(),
            reply_queue,
            router,
            reply_timeout,
            consumer_task,
        })
    }

    /// Reports whether the client's channel is still usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    /// Publishes `body` under `task` and awaits the correlated reply.
    ///
    /// The wait is bounded by the client's reply timeout (callers
    /// without a better number use [`crate::DEFAULT_REPLY_TIMEOUT`]);
    /// on timeout the pending slot is removed so a late reply is
    /// silently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReplyTimeout`] if no reply arrives in time, and
    /// a broker error if the publish itself fails.
    #[instrument(skip(self, body), fields(queue = %self.queue))]
    pub async fn call(&self, body: &[u8], task: TaskKind) -> Result<Reply, Error> {
        let correlation_id = Uuid::new_v4().to_string();
        let slot = self.router.register(correlation_id.clone());

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_reply_to(self.reply_queue.clone().into())
            .with_correlation_id(correlation_id.clone().into())
            .with_kind(task.as_str().to_string().into());

        if let Err(error) = self.publish(body, properties).await {
            self.router.cancel(&correlation_id);
            return Err(error);
        }

        match tokio::time::timeout(self.reply_timeout, slot).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ReplyLost),
            Err(_) => {
                self.router.cancel(&correlation_id);
                Err(Error::ReplyTimeout(self.reply_timeout))
            }
        }
    }

    /// Publishes `body` under `task` without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish fails.
    #[instrument(skip(self, body), fields(queue = %self.queue))]
    pub async fn cast(&self, body: &[u8], task: TaskKind) -> Result<(), Error> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_correlation_id(Uuid::new_v4().to_string().into())
            .with_kind(task.as_str().to_string().into());
        self.publish(body, properties).await
    }

    async fn publish(&self, body: &[u8], properties: BasicProperties) -> Result<(), Error> {
        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.consumer_task.abort();
    }
}

async fn route_replies(mut consumer: Consumer, router: Arc<ReplyRouter>) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(error) => {
                warn!(%error, "reply consumer failed; stopping");
                break;
            }
        };
        let Some(correlation_id) = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(ToString::to_string)
        else {
            warn!("dropping reply without a correlation id");
            continue;
        };
        let status = delivery
            .properties
            .kind()
            .as_ref()
            .and_then(|kind| kind.as_str().parse().ok())
            .unwrap_or(500u16);
        let routed = router.route(
            &correlation_id,
            Reply {
                status,
                body: delivery.data,
            },
        );
        if !routed {
            debug!(correlation_id, "dropping reply with no pending caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        Reply,
        ReplyRouter,
    };

    fn reply(status: u16, body: &str) -> Reply {
        Reply {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn reply_reaches_its_registered_caller() {
        let router = ReplyRouter::default();
        let slot = router.register("abc".to_string());
        assert!(router.route("abc", reply(200, "ok")));
        assert_eq!(reply(200, "ok"), slot.await.unwrap());
        assert_eq!(0, router.len());
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let router = ReplyRouter::default();
        assert!(!router.route("never-registered", reply(200, "ok")));
    }

    #[tokio::test]
    async fn cancelled_slot_discards_late_reply() {
        let router = ReplyRouter::default();
        let slot = router.register("abc".to_string());
        router.cancel("abc");
        assert!(!router.route("abc", reply(200, "late")));
        assert!(slot.await.is_err());
    }

    #[tokio::test]
    async fn fifty_concurrent_callers_each_get_their_own_reply() {
        let router = Arc::new(ReplyRouter::default());

        let waiters: Vec<_> = (0..50)
            .map(|i| {
                let correlation_id = format!("corr-{i}");
                let slot = router.register(correlation_id.clone());
                tokio::spawn(async move { (correlation_id, slot.await.unwrap()) })
            })
            .collect();

        // Fulfill in reverse registration order with each caller's own
        // correlation id echoed in the body.
        for i in (0..50).rev() {
            let correlation_id = format!("corr-{i}");
            assert!(router.route(&correlation_id, reply(200, &correlation_id)));
        }

        for waiter in waiters {
            let (correlation_id, received) = waiter.await.unwrap();
            assert_eq!(200, received.status);
            assert_eq!(correlation_id.as_bytes(), received.body.as_slice());
        }
        assert_eq!(0, router.len());
    }

    #[test]
    fn status_classification() {
        assert!(reply(200, "").is_success());
        assert!(reply(204, "").is_success());
        assert!(!reply(400, "").is_success());
        assert!(!reply(403, "").is_success());
        assert!(!reply(500, "").is_success());
    }
}
