//! Config manager, reading the content of the `.env` file.
//!
//! Reads all content from `.env` into [`Config`] for all sub-modules to use.

use crate::error::Error;
use dotenv::dotenv;
use std::path::Path;
use std::time::Duration;

pub struct Config {
    /// Explorer API token, see <https://etherscan.io/myapikey>.
    pub token_etherscan: String,

    /// Minimum time between two outgoing requests; the free explorer tier allows 5 calls per second.
    pub request_interval: Duration,
}

const ENV_VAR_TOKEN_ETHERSCAN: &str = "ETHERDUMP_TOKEN_ETHERSCAN";
const ENV_VAR_REQUEST_INTERVAL_MS: &str = "ETHERDUMP_REQUEST_INTERVAL_MS";

const DEFAULT_REQUEST_INTERVAL_MS: u64 = 250;

#[inline]
fn read_and_return_env_var(env_var: &'static str) -> Result<String, Error> {
    let res = std::env::var(env_var)
        .map_err(|err| Error::ConfigReadNonExistantEnvironmentVariable(env_var, err))?;

    match res.is_empty() {
        true => Err(Error::ConfigReadEmptyEnvironmentVariable(env_var)),
        false => Ok(res),
    }
}

fn parse_interval(env_var: &'static str, value: Option<String>) -> Result<Duration, Error> {
    match value {
        None => Ok(Duration::from_millis(DEFAULT_REQUEST_INTERVAL_MS)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::ConfigReadInvalidNumber(env_var, raw)),
    }
}

impl Config {
    /// Returns a new config manager, reading the content of `.env`.
    pub fn new() -> Result<Self, Error> {
        match Path::new(".env").exists() {
            true => {
                dotenv()?;
            }
            false => {
                // If executed within a sub-directory; a missing file is fine as long as the variables are
                // already exported
                if Path::new("../.env").exists() {
                    dotenv::from_filename("../.env")?;
                }
            }
        };

        Self::from_env()
    }

    /// Builds the config from the process environment only.
    pub fn from_env() -> Result<Self, Error> {
        let token_etherscan = read_and_return_env_var(ENV_VAR_TOKEN_ETHERSCAN)?;
        let request_interval = parse_interval(
            ENV_VAR_REQUEST_INTERVAL_MS,
            std::env::var(ENV_VAR_REQUEST_INTERVAL_MS).ok().filter(|x| !x.is_empty()),
        )?;

        Ok(Config {
            token_etherscan,
            request_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_when_unset() {
        let interval = parse_interval(ENV_VAR_REQUEST_INTERVAL_MS, None).unwrap();
        assert_eq!(interval, Duration::from_millis(DEFAULT_REQUEST_INTERVAL_MS));
    }

    #[test]
    fn interval_parses_milliseconds() {
        let interval = parse_interval(ENV_VAR_REQUEST_INTERVAL_MS, Some(" 1000 ".to_string())).unwrap();
        assert_eq!(interval, Duration::from_secs(1));
    }

    #[test]
    fn interval_rejects_garbage() {
        let err = parse_interval(ENV_VAR_REQUEST_INTERVAL_MS, Some("fast".to_string())).unwrap_err();
        assert!(matches!(err, Error::ConfigReadInvalidNumber(ENV_VAR_REQUEST_INTERVAL_MS, _)));
    }
}
