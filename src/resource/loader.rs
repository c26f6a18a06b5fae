//! # Resource Loader
//!
//! Follows HTTP redirects over TLS while recording every hop and invoking
//! the certificate validator per hop. At most one connection is open at a
//! time; each hop's stream is closed before the next redirect is followed.

use thiserror::Error;
use url::Url;

use crate::activation::ActivationContext;
use crate::core::origin::is_redirect_status;
use crate::provider::{HttpRequest, HttpTransport};

use super::context::{CertifiedHop, ResourceContext};
use super::validator::{CertificateValidator, ValidationError, ValidationOutcome};

/// Maximum number of successive redirects.
const MAX_REDIRECTS: usize = 10;

/// `Accept` header sent when retrieving resources.
pub const ACCEPT_HEADER: &str = "text/xml, */*;q=0.8";

/// `Accept-Charset` header sent when retrieving resources.
pub const ACCEPT_CHARSET_HEADER: &str = "utf-8, *;q=0.8";

/// Errors raised while loading a resource.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A non-HTTPS URL was requested or followed.
    #[error("non HTTPS based protocol requested")]
    InsecureUrl,

    /// The redirect chain exceeded the hop limit.
    #[error("the maximum number of successive redirects has been reached")]
    RedirectDepth,

    /// A redirect response without a `Location` header.
    #[error("Location header is missing in redirect response")]
    MissingLocation,

    /// A redirect response with an unusable `Location` header.
    #[error("invalid Location header in redirect response: {0}")]
    InvalidLocation(String),

    /// The validator asked for more redirects but the server stopped
    /// redirecting before the chain reached a valid destination.
    #[error("redirect URL is not a valid redirection target")]
    InvalidRedirectChain,

    /// The server answered with an error status.
    #[error("received a result code {status} from server")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// A hop failed certificate validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Loads resources on behalf of one activation, carrying its cookie jar.
pub struct ResourceLoader<'a, P> {
    provider: &'a P,
    ctx: &'a ActivationContext,
    pkix_verify: bool,
}

impl<'a, P: HttpTransport> ResourceLoader<'a, P> {
    /// Creates a loader for the TR-03112 activation flow. PKIX chain
    /// verification is off; trust comes from pinning and the same-origin
    /// policy instead.
    #[must_use]
    pub fn new(provider: &'a P, ctx: &'a ActivationContext) -> Self {
        Self { provider, ctx, pkix_verify: false }
    }

    /// Loads `url` following redirects, without a validator. Every
    /// terminal (non-redirect, non-error) status ends the chain.
    ///
    /// # Errors
    ///
    /// See [`LoadError`].
    pub async fn load(&self, url: &Url) -> Result<ResourceContext, LoadError> {
        self.load_inner(url, None).await
    }

    /// Loads `url` following redirects, invoking `validator` at every hop.
    ///
    /// # Errors
    ///
    /// See [`LoadError`]; validation failures stop the chain immediately.
    pub async fn load_with_validator(
        &self, url: &Url, validator: &mut dyn CertificateValidator,
    ) -> Result<ResourceContext, LoadError> {
        self.load_inner(url, Some(validator)).await
    }

    async fn load_inner(
        &self, url: &Url, mut validator: Option<&mut dyn CertificateValidator>,
    ) -> Result<ResourceContext, LoadError> {
        let mut url = url.clone();
        let mut hops: Vec<CertifiedHop> = Vec::new();

        for _ in 0..MAX_REDIRECTS {
            tracing::info!("trying to load resource from: {url}");

            if url.scheme() != "https" {
                return Err(LoadError::InsecureUrl);
            }

            let session = self.provider.connect(&url, self.pkix_verify).await?;
            hops.push(CertifiedHop { url: url.clone(), certificate: session.certificate.clone() });

            let outcome = match validator.as_deref_mut() {
                Some(v) => Some(v.step(&url, &session.certificate)?),
                None => None,
            };
            if outcome == Some(ValidationOutcome::Finish) {
                // destination reached; no request is sent for this hop
                return Ok(ResourceContext::new(Some(session.channel), hops, None));
            }

            let mut channel = session.channel;
            let mut request = HttpRequest::get(url.clone())
                .header("Accept", ACCEPT_HEADER)
                .header("Accept-Charset", ACCEPT_CHARSET_HEADER);
            if let Some(cookies) = self.ctx.cookie_header_for(&url) {
                request = request.header("Cookie", cookies);
            }

            tracing::debug!("sending HTTP request");
            let response = channel.get(&request)?;
            tracing::debug!("HTTP response received");
            for header in &response.set_cookies {
                self.ctx.store_cookie(&url, header);
            }

            if is_redirect_status(response.status) {
                let location = response.location.ok_or(LoadError::MissingLocation)?;
                let next =
                    url.join(&location).map_err(|_| LoadError::InvalidLocation(location))?;
                channel.close();
                url = next;
            } else if response.status >= 400 {
                tracing::debug!(
                    "received a result code {} '{}' from server",
                    response.status,
                    response.reason.as_deref().unwrap_or("")
                );
                return Err(LoadError::Status { status: response.status });
            } else if outcome == Some(ValidationOutcome::Continue) {
                return Err(LoadError::InvalidRedirectChain);
            } else {
                return Ok(ResourceContext::new(Some(channel), hops, response.body));
            }
        }

        Err(LoadError::RedirectDepth)
    }
}
