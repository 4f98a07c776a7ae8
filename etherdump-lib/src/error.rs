//! Errors that might be returned when using this crate.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Explorer Errors
    #[error("Invalid explorer API token '{0}'")]
    EtherscanInvalidToken(String),

    #[error("Failed to retrieve source for '{0}'; Contract source code not verified")]
    EtherscanContractSourceCodeNotVerified(String),

    #[error("Explorer returned an empty source for '{0}'")]
    EtherscanEmptySource(String),

    #[error("Explorer returned no source entry for '{0}'")]
    EtherscanMissingSource(String),

    #[error("Failed to parse verified contracts page '{0}'; {1}")]
    EtherscanListingMalformed(String, String),

    #[error("Failed to deserialize JSON input; {0}")]
    DeserializeError(#[from] serde_json::Error),

    // HTTP Errors
    #[error("Failed to send HTTP request; {0}")]
    HttpRequest(#[source] reqwest::Error),

    #[error("Giving up on '{0}' after {1} retries; last reason '{2}'")]
    HttpRetriesExhausted(String, usize, String),

    #[error("Invalid service URL '{0}'; {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    // Config Errors
    #[error("Failed to read .env file; {0}")]
    ConfigRead(#[from] dotenv::Error),

    #[error("Environment variable '{0}' does not exist; {1}")]
    ConfigReadNonExistantEnvironmentVariable(&'static str, #[source] std::env::VarError),

    #[error("Environment variable '{0}' is empty")]
    ConfigReadEmptyEnvironmentVariable(&'static str),

    #[error("Environment variable '{0}' is not a valid number; '{1}'")]
    ConfigReadInvalidNumber(&'static str, String),

    // Storage Errors
    #[error("Failed to create directory '{0}'; {1}")]
    StorageCreateDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to open '{0}' for writing; {1}")]
    StorageOpen(PathBuf, #[source] std::io::Error),

    #[error("Failed to write '{0}'; {1}")]
    StorageWrite(PathBuf, #[source] std::io::Error),

    #[error("Failed to move '{0}' into place; {1}")]
    StorageRename(PathBuf, #[source] std::io::Error),

    #[error("Failed to serialize ledger entry for '{0}'; {1}")]
    StorageSerialize(String, #[source] serde_json::Error),
}

impl Error {
    /// Returns true for errors that leave the crawl without durable storage, i.e. errors that can not be
    /// recovered from by skipping a single contract.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::StorageCreateDir(..)
                | Error::StorageOpen(..)
                | Error::StorageWrite(..)
                | Error::StorageRename(..)
                | Error::StorageSerialize(..)
        )
    }
}
