use std::net::SocketAddr;

use eyre::WrapErr as _;
use till_broker::{
    Broker,
    Worker,
};
use tokio::{
    net::TcpListener,
    task::JoinError,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
};

use crate::{
    api,
    handler::PaymentHandler,
    metrics::Metrics,
    storage::PaymentStore,
    Config,
    WORK_QUEUE,
};

/// The assembled payment service: HTTP API plus the `payment` queue
/// worker, sharing one store and one broker connection.
pub struct PaymentService {
    api_listener: TcpListener,
    api_router: axum::Router,
    worker: Worker<PaymentHandler>,
    shutdown_token: CancellationToken,
    // Owns the broker connection the worker's channel was derived from.
    broker: Broker,
}

impl PaymentService {
    /// Connects the store and the broker and binds all listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the database, broker, or API listener cannot
    /// be set up.
    pub async fn new(cfg: &Config) -> eyre::Result<Self> {
        let prometheus =
            telemetry::register_prometheus().wrap_err("failed installing metrics recorder")?;
        let metrics: &'static Metrics = Box::leak(Box::new(Metrics::new()));

        let store = PaymentStore::connect(&cfg.database_url)
            .await
            .wrap_err("failed connecting to the payments database")?;

        let broker = Broker::new(&cfg.amqp_url);
        broker
            .connect()
            .await
            .wrap_err("failed connecting to the message broker")?;

        let shutdown_token = CancellationToken::new();
        let worker = Worker::bind(
            &broker,
            WORK_QUEUE,
            PaymentHandler::new(store.clone(), metrics),
            shutdown_token.clone(),
        )
        .await
        .wrap_err("failed binding the payment worker")?;

        let api_listener = TcpListener::bind(cfg.api_listen_addr)
            .await
            .wrap_err("failed binding the API listener")?;
        info!(
            listen_addr = %api_listener
                .local_addr()
                .wrap_err("failed reading the API listener's local address")?,
            "API server listening",
        );

        Ok(Self {
            api_listener,
            api_router: api::router(store, metrics, prometheus),
            worker,
            shutdown_token,
            broker,
        })
    }

    /// The socket address the API server is served over.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read back.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.api_listener.local_addr()
    }

    /// Runs the service until SIGTERM or until a task stops unexpectedly.
    pub async fn run_until_stopped(self) {
        let Self {
            api_listener,
            api_router,
            worker,
            shutdown_token,
            broker: _broker,
        } = self;

        let api_task = tokio::spawn({
            let shutdown_token = shutdown_token.clone();
            async move {
                axum::serve(api_listener, api_router)
                    .with_graceful_shutdown(shutdown_token.cancelled_owned())
                    .await
                    .wrap_err("API server ended unexpectedly")
            }
        });
        let worker_task = tokio::spawn(worker.run_until_stopped());

        tokio::select! {
            _ = sigterm() => info!("received SIGTERM, shutting down"),
            o = api_task => report_exit("api server", o),
            o = worker_task => report_exit("payment worker", o),
        }
        shutdown_token.cancel();
    }
}

async fn sigterm() -> std::io::Result<()> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?
        .recv()
        .await;
    Ok(())
}

fn report_exit(task_name: &str, outcome: Result<eyre::Result<()>, JoinError>) {
    match outcome {
        Ok(Ok(())) => info!(task = task_name, "task exited successfully"),
        Ok(Err(error)) => {
            error!(%error, task = task_name, "task returned with error");
        }
        Err(error) => {
            error!(%error, task = task_name, "task failed to complete");
        }
    }
}
