use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use eyre::WrapErr as _;
use till_broker::Broker;
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
    checkout::Orchestrator,
    metrics::Metrics,
    storage::OrderStore,
    Config,
};

/// The assembled orders service: HTTP API in front of the checkout
/// orchestrator.
pub struct OrdersService {
    api_listener: TcpListener,
    api_router: axum::Router,
    shutdown_token: CancellationToken,
}

impl OrdersService {
    /// Connects the store and the broker and binds the API listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the database, broker, or API listener cannot
    /// be set up.
    pub async fn new(cfg: &Config) -> eyre::Result<Self> {
        let prometheus =
            telemetry::register_prometheus().wrap_err("failed installing metrics recorder")?;
        let metrics: &'static Metrics = Box::leak(Box::new(Metrics::new()));

        let store = OrderStore::connect(&cfg.database_url)
            .await
            .wrap_err("failed connecting to the orders database")?;

        let broker = Broker::new(&cfg.amqp_url);
        broker
            .connect()
            .await
            .wrap_err("failed connecting to the message broker")?;

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            broker,
            Duration::from_millis(cfg.rpc_reply_timeout_ms),
            metrics,
        ));

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
            api_router: api::router(orchestrator, prometheus),
            shutdown_token: CancellationToken::new(),
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

    /// Runs the service until SIGTERM or until the API server stops
    /// unexpectedly.
    pub async fn run_until_stopped(self) {
        let Self {
            api_listener,
            api_router,
            shutdown_token,
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

        tokio::select! {
            _ = sigterm() => info!("received SIGTERM, shutting down"),
            o = api_task => report_exit("api server", o),
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
