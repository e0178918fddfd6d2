//! Environment-only configuration for till services.
//!
//! Every service defines a plain serde struct, implements [`Config`] with
//! the service's env var prefix, and calls `Config::get` in its `main`.
//! All configuration comes from the environment; there are no config
//! files and no CLI flags.
//!
//! ```
//! use serde::{
//!     Deserialize,
//!     Serialize,
//! };
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! #[serde(deny_unknown_fields)]
//! pub struct Config {
//!     pub log: String,
//!     pub api_listen_addr: std::net::SocketAddr,
//! }
//!
//! impl till_config::Config for Config {
//!     const PREFIX: &'static str = "MY_SERVICE_";
//! }
//! ```

#[cfg(feature = "tests")]
pub mod tests;

pub use figment;
use figment::{
    providers::Env,
    Figment,
};
use serde::de::DeserializeOwned;

/// A config that can be extracted from the process environment.
///
/// `PREFIX` is stripped from every env var before deserialization, so
/// `TILL_STOCK_API_LISTEN_ADDR` populates the `api_listen_addr` field of
/// a config with `PREFIX = "TILL_STOCK_"`.
pub trait Config: ::core::fmt::Debug + DeserializeOwned {
    const PREFIX: &'static str;

    /// Reads the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required var is unset or fails to parse.
    fn get() -> Result<Self, figment::Error> {
        Self::from_environment(Self::PREFIX)
    }

    #[doc(hidden)]
    fn from_environment(env_prefix: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Env::prefixed(env_prefix))
            .extract()
    }
}
