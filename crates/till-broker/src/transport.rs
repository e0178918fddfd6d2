//! The process-wide AMQP connection and the queues derived from it.

use std::time::Duration;

use lapin::{
    options::QueueDeclareOptions,
    types::FieldTable,
    Channel,
    Connection,
    ConnectionProperties,
};
use tokio::sync::Mutex;
use tracing::{
    info,
    instrument,
    warn,
};

use crate::Error;

/// A lazily connected handle to the AMQP broker.
///
/// Every service holds exactly one `Broker` and derives all of its
/// channels from it; channels are never shared between concurrent
/// senders. A dead connection is reopened on the next use, so after a
/// broker outage the first operation pays the reconnect and later ones
/// reuse it.
///
/// Heartbeats are disabled on the connection. Liveness is inferred from
/// reply timeouts at the RPC layer instead, which keeps long idle reply
/// waits off the heartbeat clock.
pub struct Broker {
    uri: String,
    connection: Mutex<Option<Connection>>,
}

impl Broker {
    /// Creates a disconnected handle for the given AMQP URI.
    #[must_use]
    pub fn new(uri: &str) -> Self {
        Self {
            uri: with_disabled_heartbeat(uri),
            connection: Mutex::new(None),
        }
    }

    /// Connects to the broker, retrying with exponential backoff.
    ///
    /// Intended for service startup; all later operations reconnect
    /// without retry via [`Broker::ensure_connected`].
    ///
    /// # Errors
    ///
    /// Returns the last connection error after all retries are exhausted.
    #[instrument(skip_all, err)]
    pub async fn connect(&self) -> Result<(), Error> {
        let retry_config = tryhard::RetryFutureConfig::new(16)
            .exponential_backoff(Duration::from_millis(500))
            .max_delay(Duration::from_secs(10))
            .on_retry(|attempt, next_delay: Option<Duration>, error: &Error| {
                let wait_duration = next_delay
                    .map(humantime::format_duration)
                    .map(tracing::field::display);
                warn!(
                    attempt,
                    wait_duration,
                    %error,
                    "connecting to the message broker failed; retrying after backoff",
                );
                futures::future::ready(())
            });

        tryhard::retry_fn(|| self.ensure_connected())
            .with_config(retry_config)
            .await
    }

    /// Opens the connection if it is absent or dead. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        let mut slot = self.connection.lock().await;
        reconnect_if_dead(&self.uri, &mut slot).await.map(|_| ())
    }

    /// Reports whether the underlying connection is currently alive.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| connection.status().connected())
    }

    /// Derives a fresh channel, reopening the connection if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if reconnecting or opening the channel fails.
    pub async fn open_channel(&self) -> Result<Channel, Error> {
        let mut slot = self.connection.lock().await;
        let connection = reconnect_if_dead(&self.uri, &mut slot).await?;
        Ok(connection.create_channel().await?)
    }
}

async fn reconnect_if_dead<'a>(
    uri: &str,
    slot: &'a mut Option<Connection>,
) -> Result<&'a Connection, Error> {
    if !slot
        .as_ref()
        .is_some_and(|connection| connection.status().connected())
    {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        info!("connected to the message broker");
        *slot = Some(connection);
    }
    Ok(slot
        .as_ref()
        .expect("the connection slot was just filled above"))
}

/// Declares the durable work queue a worker consumes from.
///
/// # Errors
///
/// Returns an error if the declaration is refused by the broker.
pub async fn declare_work_queue(channel: &Channel, name: &str) -> Result<(), Error> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Declares a server-named exclusive auto-delete reply queue and returns
/// its name.
///
/// # Errors
///
/// Returns an error if the declaration is refused by the broker.
pub async fn declare_reply_queue(channel: &Channel) -> Result<String, Error> {
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(queue.name().as_str().to_string())
}

fn with_disabled_heartbeat(uri: &str) -> String {
    if uri.contains("heartbeat=") {
        uri.to_string()
    } else if uri.contains('?') {
        format!("{uri}&heartbeat=0")
    } else {
        format!("{uri}?heartbeat=0")
    }
}

#[cfg(test)]
mod tests {
    use super::with_disabled_heartbeat;

    #[test]
    fn heartbeat_is_appended_to_bare_uri() {
        assert_eq!(
            "amqp://rabbitmq:5672/%2f?heartbeat=0",
            with_disabled_heartbeat("amqp://rabbitmq:5672/%2f")
        );
    }

    #[test]
    fn heartbeat_is_appended_to_existing_query() {
        assert_eq!(
            "amqp://rabbitmq:5672/%2f?frame_max=8192&heartbeat=0",
            with_disabled_heartbeat("amqp://rabbitmq:5672/%2f?frame_max=8192")
        );
    }

    #[test]
    fn explicit_heartbeat_is_left_alone() {
        assert_eq!(
            "amqp://rabbitmq:5672/%2f?heartbeat=30",
            with_disabled_heartbeat("amqp://rabbitmq:5672/%2f?heartbeat=30")
        );
    }
}
