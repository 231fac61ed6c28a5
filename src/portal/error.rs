//! Error types for portal page fetches.

use thiserror::Error;

/// Errors raised while fetching a portal page.
///
/// None of these abort a stage: callers log them and move on to the next
/// endpoint template.
#[derive(Debug, Error)]
pub enum PortalError {
    /// DNS, connection or TLS failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded the page timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Any non-200 response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The template produced something that is not a URL.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl PortalError {
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }
}
