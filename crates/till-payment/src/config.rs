use std::net::SocketAddr;

use serde::{
    Deserialize,
    Serialize,
};

/// The config for creating a till-payment service, read from
/// `TILL_PAYMENT_`-prefixed env vars.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Filter directives for the tracing subscriber.
    pub log: String,
    /// Address the HTTP API listens on.
    pub api_listen_addr: SocketAddr,
    /// AMQP URI of the message broker.
    pub amqp_url: String,
    /// Postgres connection string for the users/payments database.
    pub database_url: String,
}

impl config::Config for Config {
    const PREFIX: &'static str = "TILL_PAYMENT_";
}

/// Reads the service config from the environment.
///
/// # Errors
///
/// Returns an error if a required var is unset or fails to parse.
pub fn get() -> Result<Config, config::figment::Error> {
    <Config as config::Config>::get()
}

#[cfg(test)]
mod tests {
    use super::Config;

    const EXAMPLE_ENV: &str = include_str!("../local.env.example");

    #[test]
    fn example_env_config_is_up_to_date() {
        config::tests::example_env_config_is_up_to_date::<Config>(EXAMPLE_ENV);
    }

    #[test]
    #[should_panic]
    fn config_should_reject_unknown_var() {
        config::tests::config_should_reject_unknown_var::<Config>(EXAMPLE_ENV);
    }
}
