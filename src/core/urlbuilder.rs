//! # Redirect URL Construction
//!
//! Builds the browser redirect URLs mandated by TR-03124-1: the refresh or
//! communication error address augmented with `ResultMajor`, `ResultMinor`
//! and optionally `ResultMessage` query parameters. Existing query
//! parameters are preserved; values are percent-encoded.

use url::Url;

/// Incrementally appends query parameters to a URL.
#[derive(Clone, Debug)]
pub struct UrlBuilder {
    url: Url,
    params: Vec<(String, String)>,
}

impl UrlBuilder {
    /// Starts a builder from an existing URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self { url: url.clone(), params: Vec::new() }
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Builds the final URL, keeping any query parameters already present.
    #[must_use]
    pub fn build(self) -> Url {
        let mut url = self.url;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.params {
                pairs.append_pair(name, value);
            }
        }
        url
    }
}

/// Extracts the bare error code from a TR-03112 result minor URI: the last
/// `#`-delimited segment. A value without `#` is returned unchanged.
#[must_use]
pub fn fix_result_minor(minor: &str) -> &str {
    minor.rsplit('#').next().unwrap_or(minor)
}

/// Augments `url` with `ResultMajor=error`, the given result minor (reduced
/// to its bare code) and an optional `ResultMessage`.
#[must_use]
pub fn with_error_params(url: &Url, minor: &str, message: Option<&str>) -> Url {
    let mut builder = UrlBuilder::from_url(url)
        .query_param("ResultMajor", "error")
        .query_param("ResultMinor", fix_result_minor(minor));
    if let Some(message) = message {
        builder = builder.query_param("ResultMessage", message);
    }
    builder.build()
}
