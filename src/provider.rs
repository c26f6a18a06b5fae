//! # Provider
//!
//! Collaborator traits consumed by the activation core. Implementers supply
//! the HTTP/TLS transports, the SAL dispatcher used to talk to the
//! smartcard stack, the PAOS exchange, schema validation and configuration.
//! The core itself never opens sockets or parses TLS records; everything
//! I/O-shaped crosses this seam.

use std::future::Future;

use rustls_pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::activation::ActivationContext;
use crate::channel::{ChannelSecurity, TlsEndpoint};
use crate::core::ecard::ECardResult;
use crate::error::TaskFailure;
use crate::token::TcToken;

/// Result type for provider calls.
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Activation provider: the complete collaborator surface required by
/// [`handle_activate`](crate::activation::handle_activate).
pub trait Provider:
    HttpTransport + TlsDialer + SalDispatcher + PaosTransport + SchemaValidation + Config + Clone
{
}

/// A single HTTP request to be sent over an established channel.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Target URL (host must match the channel's peer).
    pub url: Url,

    /// Request headers in order.
    pub headers: Vec<(&'static str, String)>,
}

impl HttpRequest {
    /// A GET request for the given URL.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self { url, headers: Vec::new() }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// The interesting parts of an HTTP response.
#[derive(Clone, Debug, Default)]
pub struct HttpResponseParts {
    /// Status code.
    pub status: u16,

    /// Reason phrase, when the transport surfaces one.
    pub reason: Option<String>,

    /// `Location` header of a redirect response.
    pub location: Option<String>,

    /// All `Set-Cookie` header values.
    pub set_cookies: Vec<String>,

    /// Response body, when one was read.
    pub body: Option<String>,
}

/// A live TLS channel to one server. Exactly one party owns the channel at
/// any time; it is closed on every exit path.
pub trait EidChannel: Send + Sync {
    /// Sends one request and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails mid-exchange.
    fn get(&mut self, request: &HttpRequest) -> Result<HttpResponseParts>;

    /// The DER-encoded leaf certificate the server presented.
    fn peer_certificate(&self) -> &CertificateDer<'static>;

    /// Whether the underlying transport has been closed.
    fn is_closed(&self) -> bool;

    /// Releases the underlying transport.
    fn close(&mut self);
}

/// A freshly established TLS session: the observed server certificate and
/// the channel it belongs to.
pub struct TlsSession {
    /// DER-encoded leaf certificate presented during the handshake.
    pub certificate: CertificateDer<'static>,

    /// The live channel.
    pub channel: Box<dyn EidChannel>,
}

/// Performs the TLS handshake for resource retrieval. One call opens one
/// connection; redirect following is driven by the resource loader.
pub trait HttpTransport: Send + Sync {
    /// Connects to the host of `url` and performs the TLS handshake. No
    /// HTTP request is sent yet. `pkix_verify` selects whether the chain
    /// is verified against the system trust store.
    fn connect(
        &self, url: &Url, pkix_verify: bool,
    ) -> impl Future<Output = Result<TlsSession>> + Send;
}

/// Opens the secured channel to the eID server according to the selected
/// [`ChannelSecurity`].
pub trait TlsDialer: Send + Sync {
    /// Dials `endpoint` with the given channel security. For
    /// [`ChannelSecurity::SameChannel`] this is the resumption fallback
    /// path taken when the original channel reports closed.
    fn dial(
        &self, endpoint: &TlsEndpoint, security: &ChannelSecurity,
    ) -> impl Future<Output = Result<Box<dyn EidChannel>>> + Send;
}

/// A connection handle as used by the SAL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    /// Context handle of the session.
    pub context_handle: Option<Vec<u8>>,

    /// Slot handle once a card is connected.
    pub slot_handle: Option<Vec<u8>>,

    /// Recognized card type URI.
    pub card_type: Option<String>,
}

/// A typed SAL response: the eCard result plus the payload.
#[derive(Clone, Debug)]
pub struct SalResponse<T> {
    /// Result reported by the SAL.
    pub result: ECardResult,

    /// Response payload; only meaningful when the result is positive.
    pub payload: T,
}

/// Dispatcher delivering SAL requests to the smartcard stack.
pub trait SalDispatcher: Send + Sync {
    /// `CreateSession`: initializes the SAL and returns the connection
    /// handle for this activation.
    fn create_session(&self) -> impl Future<Output = Result<SalResponse<ConnectionHandle>>> + Send;

    /// `CardApplicationPath`: resolves the card application paths for the
    /// given handle.
    fn card_application_path(
        &self, handle: &ConnectionHandle,
    ) -> impl Future<Output = Result<SalResponse<Vec<ConnectionHandle>>>> + Send;

    /// `CardApplicationConnect`: connects the card application and returns
    /// the handle including the slot handle.
    fn card_application_connect(
        &self, path: &ConnectionHandle,
    ) -> impl Future<Output = Result<SalResponse<ConnectionHandle>>> + Send;

    /// `CardApplicationDisconnect` with reset semantics. Runs on every exit
    /// path of the binding task.
    fn card_application_disconnect(
        &self, handle: &ConnectionHandle,
    ) -> impl Future<Output = Result<SalResponse<()>>> + Send;
}

/// Drives the PAOS exchange over an established channel.
pub trait PaosTransport: Send + Sync {
    /// Runs `StartPAOS` and the subsequent eCard API conversation over
    /// `channel`. The implementation deposits the eService
    /// `CertificateDescription` into `ctx` as soon as the EAC step has
    /// produced it.
    fn start_paos(
        &self, ctx: &ActivationContext, channel: &mut dyn EidChannel, token: &TcToken,
        handle: &ConnectionHandle, validator: &dyn DocumentValidator,
    ) -> impl Future<Output = std::result::Result<(), TaskFailure>> + Send;
}

/// Validates management message documents against their schema.
pub trait DocumentValidator: Send + Sync {
    /// Validates one document.
    ///
    /// # Errors
    ///
    /// Returns the validator diagnostic when the document is invalid.
    fn validate(&self, document: &str) -> std::result::Result<(), String>;
}

/// Fallback validator that accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllValidator;

impl DocumentValidator for AcceptAllValidator {
    fn validate(&self, _document: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Loads the schema validator for management messages.
pub trait SchemaValidation: Send + Sync {
    /// Builds the validator. Loaded lazily; failures degrade to a no-op
    /// validator with a warning.
    fn management_validator(
        &self,
    ) -> impl Future<Output = Result<Box<dyn DocumentValidator>>> + Send;
}

/// Static client configuration.
pub trait Config: Send + Sync {
    /// Whether developer mode is active. Developer mode disables all
    /// TR-03124-1 security checks and must never be enabled in production.
    fn developer_mode(&self) -> bool {
        false
    }

    /// Legacy switch skipping schema validation of management messages.
    fn legacy_invalid_schema(&self) -> bool {
        false
    }

    /// Disables PKIX chain verification for the mTLS channel.
    fn pkix_disabled(&self) -> bool {
        false
    }
}
