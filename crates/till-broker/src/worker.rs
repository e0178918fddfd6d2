//! The worker half of the broker RPC protocol.
//!
//! A [`Worker`] consumes one durable work queue with `prefetch=1` and
//! manual acks, dispatches each message by its task name to the
//! service's [`TaskHandler`], and publishes the handler's response to
//! the caller's reply queue when one is named.

use async_trait::async_trait;
use futures::StreamExt as _;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        BasicRejectOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    transport,
    Broker,
    Error,
    TaskKind,
};

/// What a handler produced for one request: an HTTP-like status code and
/// the reply body to ship back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }
}

/// The service-side dispatch target for every task arriving on the
/// worker's queue.
///
/// `Ok(None)` means the task is not one this service executes (a message
/// addressed to the wrong queue); it is acked and dropped without a
/// reply, exactly like a message with an unknown task name. A returned
/// error means the request could not be processed at all (e.g. the
/// database was unreachable); the message is then dropped without
/// requeue and without reply, and the caller learns about it through
/// its reply timeout. Domain failures are not errors here: they are
/// `Response`s with a non-2xx status.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: TaskKind, body: &[u8]) -> eyre::Result<Option<Response>>;
}

/// Consumes a durable work queue and dispatches to a [`TaskHandler`].
pub struct Worker<H> {
    channel: Channel,
    queue: &'static str,
    handler: H,
    shutdown_token: CancellationToken,
}

impl<H: TaskHandler> Worker<H> {
    /// Binds a worker to `queue` on a fresh channel of `broker`.
    ///
    /// Declares the queue (durable) and sets `prefetch=1` so at most one
    /// unacknowledged message is in flight per worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or queue cannot be set up.
    pub async fn bind(
        broker: &Broker,
        queue: &'static str,
        handler: H,
        shutdown_token: CancellationToken,
    ) -> Result<Self, Error> {
        let channel = broker.open_channel().await?;
        transport::declare_work_queue(&channel, queue).await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        Ok(Self {
            channel,
            queue,
            handler,
            shutdown_token,
        })
    }

    /// Runs the consume loop until shutdown or a consumer failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying consumer stream fails or ends
    /// unexpectedly.
    pub async fn run_until_stopped(self) -> eyre::Result<()> {
        use eyre::WrapErr as _;

        let Self {
            channel,
            queue,
            handler,
            shutdown_token,
        } = self;

        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .wrap_err("failed starting consumer on work queue")?;

        info!(queue, "worker consuming");

        loop {
            select! {
                biased;
                () = shutdown_token.cancelled() => {
                    info!(queue, "shutdown signal received");
                    break Ok(());
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            process_delivery(&channel, queue, &handler, delivery).await;
                        }
                        Some(Err(error)) => {
                            break Err(error).wrap_err("work queue consumer failed");
                        }
                        None => break Err(eyre::eyre!("work queue consumer stream ended")),
                    }
                }
            }
        }
    }
}

#[instrument(skip_all, fields(queue))]
async fn process_delivery<H: TaskHandler>(
    channel: &Channel,
    queue: &str,
    handler: &H,
    delivery: Delivery,
) {
    let Some(task) = task_of(&delivery) else {
        // Requests outside the task vocabulary are dropped without a
        // reply; their sender learns about it through its reply timeout.
        warn!(
            task = delivery
                .properties
                .kind()
                .as_ref()
                .map_or("<unset>", |kind| kind.as_str()),
            "ignoring message with unknown task name",
        );
        ack(&delivery).await;
        return;
    };

    let response = match handler.handle(task, &delivery.data).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            warn!(%task, "task is not served by this worker; ignoring message");
            ack(&delivery).await;
            return;
        }
        Err(error) => {
            warn!(%task, error = %format!("{error:#}"), "task handler failed; dropping message");
            reject(&delivery).await;
            return;
        }
    };

    debug!(%task, status = response.status, "task handled");

    if let Some(reply_to) = reply_to_of(&delivery) {
        let mut properties =
            BasicProperties::default().with_kind(response.status.to_string().into());
        if let Some(correlation_id) = delivery.properties.correlation_id() {
            properties = properties.with_correlation_id(correlation_id.clone());
        }
        let published = channel
            .basic_publish(
                "",
                &reply_to,
                BasicPublishOptions::default(),
                &response.body,
                properties,
            )
            .await;
        match published {
            Ok(confirm) => {
                if let Err(error) = confirm.await {
                    warn!(%task, %error, "broker rejected reply publish; dropping message");
                    reject(&delivery).await;
                    return;
                }
            }
            Err(error) => {
                warn!(%task, %error, "failed publishing reply; dropping message");
                reject(&delivery).await;
                return;
            }
        }
    }

    ack(&delivery).await;
}

fn task_of(delivery: &Delivery) -> Option<TaskKind> {
    delivery
        .properties
        .kind()
        .as_ref()
        .and_then(|kind| kind.as_str().parse().ok())
}

fn reply_to_of(delivery: &Delivery) -> Option<String> {
    delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|queue| queue.as_str().to_string())
        .filter(|queue| !queue.is_empty())
}

async fn ack(delivery: &Delivery) {
    if let Err(error) = delivery.acker.ack(BasicAckOptions::default()).await {
        warn!(%error, "failed to ack message");
    }
}

async fn reject(delivery: &Delivery) {
    let requeue = BasicRejectOptions {
        requeue: false,
    };
    if let Err(error) = delivery.acker.reject(requeue).await {
        warn!(%error, "failed to reject message");
    }
}

#[cfg(test)]
mod tests {
    use super::Response;

    #[test]
    fn response_constructors() {
        assert_eq!(Response::new(200, "ok"), Response::ok("ok"));
        assert_eq!(403, Response::new(403, "Not enough credit").status);
        assert_eq!(b"ok".to_vec(), Response::ok("ok").body);
    }
}
