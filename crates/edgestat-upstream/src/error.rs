//! Upstream client error types.

use thiserror::Error;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("api key is not a valid header value")]
    InvalidApiKey,

    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),
}
