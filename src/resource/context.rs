//! # Resource Context
//!
//! The result of retrieving a resource over TLS: the live channel of the
//! final hop and the ordered list of (URL, certificate) pairs recorded
//! while following redirects. The hop list is append-only during one
//! retrieval; the last entry is the current hop.

use std::fmt;

use rustls_pki_types::CertificateDer;
use url::Url;

use crate::activation::ActivationContext;
use crate::core::ecard::minor;
use crate::error::{Error, Result};
use crate::provider::{EidChannel, Provider};
use crate::token::{TcToken, TcTokenVerifier, parse_tc_tokens};

use super::loader::ResourceLoader;

/// One hop of a redirect chain: the requested URL and the server
/// certificate observed for it.
#[derive(Clone, Debug)]
pub struct CertifiedHop {
    /// URL that was requested.
    pub url: Url,

    /// DER-encoded leaf certificate the server presented.
    pub certificate: CertificateDer<'static>,
}

/// A retrieved resource: final channel, hop chain, and body.
pub struct ResourceContext {
    channel: Option<Box<dyn EidChannel>>,
    hops: Vec<CertifiedHop>,
    body: Option<String>,
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("hops", &self.hops)
            .field("body", &self.body.as_ref().map(String::len))
            .field("channel", &self.channel.is_some())
            .finish()
    }
}

impl ResourceContext {
    pub(crate) fn new(
        channel: Option<Box<dyn EidChannel>>, hops: Vec<CertifiedHop>, body: Option<String>,
    ) -> Self {
        Self { channel, hops, body }
    }

    /// The recorded hop chain, in order.
    #[must_use]
    pub fn hops(&self) -> &[CertifiedHop] {
        &self.hops
    }

    /// The URL of the final hop.
    #[must_use]
    pub fn final_url(&self) -> Option<&Url> {
        self.hops.last().map(|hop| &hop.url)
    }

    /// The retrieved body, when one was read.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Releases the channel of the final hop.
    pub fn close_stream(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Hands the live channel to the caller, e.g. for same-channel reuse.
    pub fn take_channel(&mut self) -> Option<Box<dyn EidChannel>> {
        self.channel.take()
    }
}

impl Drop for ResourceContext {
    fn drop(&mut self) {
        self.close_stream();
    }
}

/// A verified TCToken together with the resource context it was retrieved
/// over; the context decides same-channel reuse later on.
#[derive(Debug)]
pub struct TcTokenContext {
    token: TcToken,
    resource: ResourceContext,
}

impl TcTokenContext {
    /// Retrieves the token document from `url`, parses it leniently and
    /// runs the full TR-03112 verification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTcToken`] when retrieval or parsing fails,
    /// [`Error::AuthServer`] when the eService answered with an error
    /// token, or any verification error.
    pub async fn fetch<P: Provider>(
        provider: &P, ctx: &ActivationContext, url: &Url,
    ) -> Result<Self> {
        let loader = ResourceLoader::new(provider, ctx);
        let resource = loader.load(url).await.map_err(|e| Error::InvalidTcToken {
            reason: format!("failed to retrieve the TCToken: {e}"),
        })?;

        let body = resource.body().ok_or_else(|| Error::InvalidTcToken {
            reason: "TCToken response has no body".to_string(),
        })?;
        let mut tokens = parse_tc_tokens(body)?;
        let token = tokens.remove(0);

        if token.is_error_token() {
            tracing::error!("eService returned an error token");
            return Err(Error::AuthServer {
                redirect: token.com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
            });
        }

        let verifier = TcTokenVerifier::new(&token, &resource);
        verifier.verify_url_token(provider, ctx).await?;

        Ok(Self { token, resource })
    }

    /// The verified token.
    #[must_use]
    pub fn token(&self) -> &TcToken {
        &self.token
    }

    /// The retrieval context.
    #[must_use]
    pub fn resource(&self) -> &ResourceContext {
        &self.resource
    }

    /// Mutable access to the retrieval context, e.g. to take the channel
    /// for same-channel reuse or to close the stream.
    pub fn resource_mut(&mut self) -> &mut ResourceContext {
        &mut self.resource
    }
}
