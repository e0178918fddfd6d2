//! Test functions that keep a service's config and its `local.env.example`
//! in sync.
//!
//! ```rust,ignore
//! const EXAMPLE_ENV: &str = include_str!("../local.env.example");
//!
//! #[test]
//! fn example_env_config_is_up_to_date() {
//!     till_config::tests::example_env_config_is_up_to_date::<Config>(EXAMPLE_ENV);
//! }
//!
//! #[test]
//! #[should_panic]
//! fn config_should_reject_unknown_var() {
//!     till_config::tests::config_should_reject_unknown_var::<Config>(EXAMPLE_ENV);
//! }
//! ```

use figment::Jail;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::Config;

const TEST_PREFIX: &str = "TESTTEST_";

static RE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[[:space:]]+").unwrap());
static RE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:space:]]+$").unwrap());

fn populate_environment_from_example(jail: &mut Jail, example_env: &str) {
    for line in example_env.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            assert!(
                !(RE_END.is_match(key) || RE_START.is_match(val)),
                "env vars must not contain spaces in assignment\n{line}"
            );
            jail.set_env(format!("{TEST_PREFIX}{key}"), val);
        }
    }
}

/// Asserts that the example env file contains every var the config needs.
///
/// # Panics
///
/// Panics if the config cannot be extracted from the example environment.
pub fn example_env_config_is_up_to_date<C: Config>(example_env: &str) {
    let test_prefix = format!("{TEST_PREFIX}{}", C::PREFIX);
    Jail::expect_with(|jail| {
        populate_environment_from_example(jail, example_env);
        C::from_environment(&test_prefix).expect("extracting config from example env failed");
        Ok(())
    });
}

/// Asserts that the config rejects env vars it does not know.
///
/// Only meaningful for configs deriving `#[serde(deny_unknown_fields)]`;
/// call it under `#[should_panic]`.
///
/// # Panics
///
/// Panics if the config accepts an unknown var, i.e. if the config struct
/// is missing `deny_unknown_fields`.
pub fn config_should_reject_unknown_var<C: Config>(example_env: &str) {
    let test_prefix = format!("{TEST_PREFIX}{}", C::PREFIX);
    Jail::expect_with(|jail| {
        populate_environment_from_example(jail, example_env);
        jail.set_env(format!("{test_prefix}FOOBAR"), "BAZ");
        C::from_environment(&test_prefix).unwrap();
        Ok(())
    });
}
