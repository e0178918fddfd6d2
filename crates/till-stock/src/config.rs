use std::net::SocketAddr;

use serde::{
    Deserialize,
    Serialize,
};

/// The config for creating a till-stock service, read from
/// `TILL_STOCK_`-prefixed env vars.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Filter directives for the tracing subscriber.
    pub log: String,
    /// Address the HTTP API listens on.
    pub api_listen_addr: SocketAddr,
    /// AMQP URI of the message broker.
    pub amqp_url: String,
    /// Postgres connection string for the items database.
    pub database_url: String,
}

impl config::Config for Config {
    const PREFIX: &'static str = "TILL_STOCK_";
}

/// Reads the service config from the environment.
///
/// # Errors
///
/// Returns an error if a required var is unset or fails to parse.
pub fn get() -> Result<Config, config::figment::Error> {
    <Config as config::Config>::get()
}
