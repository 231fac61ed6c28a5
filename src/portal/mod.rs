//! Portal access: page fetching, endpoint templates and HTML helpers.
//!
//! Endpoint templates use two placeholders: `{base}` for the portal root and
//! `{id}` for the case or sub-case id.

mod error;
pub mod html;

pub use error::PortalError;

use reqwest::Client;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use crate::http;

/// Fetches portal pages as text.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: Client,
    base_url: String,
}

impl PortalClient {
    /// Creates a client for `base_url` with the given page read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`reqwest::Error`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, page_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::build_client(page_timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Portal root without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Expands `{base}` and `{id}` in an endpoint template.
    #[must_use]
    pub fn render(&self, template: &str, id: &str) -> String {
        render_template(template, &self.base_url, id)
    }

    /// GETs `url` and returns its body. Only HTTP 200 counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError`] on invalid URL, network failure, timeout or a
    /// non-200 status.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_page(&self, url: &str) -> Result<String, PortalError> {
        Url::parse(url).map_err(|_| PortalError::InvalidUrl {
            url: url.to_string(),
        })?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PortalError::from_reqwest(url, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(PortalError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| PortalError::from_reqwest(url, e))?;
        debug!(bytes = body.len(), "page fetched");
        Ok(body)
    }
}

/// Expands `{base}` and `{id}` placeholders.
#[must_use]
pub fn render_template(template: &str, base: &str, id: &str) -> String {
    template
        .replace("{base}", base.trim_end_matches('/'))
        .replace("{id}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template_replaces_placeholders() {
        assert_eq!(
            render_template(
                "{base}/expediente/xhr_expediente.php?id_expediente={id}",
                "https://portal.example/",
                "2151"
            ),
            "https://portal.example/expediente/xhr_expediente.php?id_expediente=2151"
        );
    }
}
