//! Error types for the DigitalOcean provider.

use crate::provider::ProviderError;
use thiserror::Error;

/// Errors raised by the DigitalOcean provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the provider credential is missing or blank.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a spec is missing a required field.
    #[error("invalid instance spec: {0}")]
    Validation(String),
    /// Raised when the HTTP transport fails before a response arrives.
    #[error("request to {endpoint} failed: {message}")]
    Transport {
        /// Endpoint path that was being called.
        endpoint: String,
        /// Transport error string.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("api error on {endpoint} (status {status}): {message}")]
    Api {
        /// Endpoint path that was being called.
        endpoint: String,
        /// HTTP status code returned.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {endpoint} response: {message}")]
    Decode {
        /// Endpoint path that was being called.
        endpoint: String,
        /// Decoder error message.
        message: String,
    },
}

impl From<ProviderError> for DigitalOceanError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Validation(field) => Self::Validation(field),
        }
    }
}
