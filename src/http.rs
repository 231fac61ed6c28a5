//! Shared HTTP client construction for portal scraping and downloads.

use std::time::Duration;

use reqwest::Client;

use crate::user_agent;

/// Connect timeout shared by every client (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Builds a client with gzip, cookies and the project User-Agent.
///
/// Cookies are kept because some listing endpoints set a session cookie on the
/// ficha page that later XHR endpoints expect.
///
/// # Errors
///
/// Returns the underlying [`reqwest::Error`] when the TLS backend or proxy
/// configuration cannot be initialized.
pub fn build_client(read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .cookie_store(true)
        .user_agent(user_agent::default_user_agent())
        .build()
}
