//! Shared test provider: scriptable transports, SAL dispatcher and PAOS
//! exchange for driving the activation core without a network or card.

// not every test binary uses every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use url::Url;

use eid_activation::activation::ActivationContext;
use eid_activation::channel::{ChannelSecurity, TlsEndpoint};
use eid_activation::core::ecard::ECardResult;
use eid_activation::error::{TaskError, TaskFailure};
use eid_activation::provider::{
    AcceptAllValidator, Config, ConnectionHandle, DocumentValidator, EidChannel, HttpRequest,
    HttpResponseParts, HttpTransport, PaosTransport, Provider, SalDispatcher, SalResponse,
    SchemaValidation, TlsDialer, TlsSession,
};
use eid_activation::resource::CertificateDescription;
use eid_activation::token::TcToken;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A deterministic fake DER certificate.
pub fn cert(tag: &str) -> Vec<u8> {
    let mut der = vec![0x30, 0x82];
    der.extend_from_slice(tag.as_bytes());
    der
}

/// SHA-256 pin of a certificate, as carried in `CommCertificates`.
pub fn pin(certificate: &[u8]) -> Vec<u8> {
    Sha256::digest(certificate).to_vec()
}

/// One scripted HTTP response.
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Option<String>,
    pub set_cookies: Vec<String>,
    pub cert: Vec<u8>,
}

impl MockResponse {
    pub fn ok_body(body: &str, cert: Vec<u8>) -> Self {
        Self { status: 200, location: None, body: Some(body.to_string()), set_cookies: Vec::new(), cert }
    }

    pub fn redirect(location: &str, cert: Vec<u8>) -> Self {
        Self {
            status: 302,
            location: Some(location.to_string()),
            body: None,
            set_cookies: Vec::new(),
            cert,
        }
    }

    pub fn status(status: u16, cert: Vec<u8>) -> Self {
        Self { status, location: None, body: None, set_cookies: Vec::new(), cert }
    }
}

/// What the scripted PAOS exchange does.
#[derive(Clone, Debug, Default)]
pub enum PaosBehavior {
    #[default]
    Succeed,
    FailECard(String),
    FailConnection(String),
    Hang,
}

#[derive(Default)]
pub struct Inner {
    pub routes: Mutex<HashMap<String, MockResponse>>,
    pub description: Mutex<Option<CertificateDescription>>,
    pub paos: Mutex<PaosBehavior>,
    pub dials: Mutex<Vec<ChannelSecurity>>,
    pub eservice_cert: Mutex<Vec<u8>>,
    pub disconnected: Mutex<bool>,
}

/// Scriptable provider implementation.
#[derive(Clone, Default)]
pub struct MockProvider(pub Arc<Inner>);

impl MockProvider {
    pub fn new() -> Self {
        let provider = Self::default();
        *provider.0.eservice_cert.lock().unwrap() = cert("eservice");
        provider
    }

    pub fn route(&self, url: &str, response: MockResponse) -> &Self {
        self.0.routes.lock().unwrap().insert(url.to_string(), response);
        self
    }

    pub fn with_description(&self, description: CertificateDescription) -> &Self {
        *self.0.description.lock().unwrap() = Some(description);
        self
    }

    pub fn with_paos(&self, behavior: PaosBehavior) -> &Self {
        *self.0.paos.lock().unwrap() = behavior;
        self
    }

    pub fn dials(&self) -> Vec<ChannelSecurity> {
        self.0.dials.lock().unwrap().clone()
    }

    pub fn disconnected(&self) -> bool {
        *self.0.disconnected.lock().unwrap()
    }

    fn response_for(&self, url: &Url) -> anyhow::Result<MockResponse> {
        self.0
            .routes
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no route configured for {url}"))
    }
}

pub struct MockChannel {
    inner: Arc<Inner>,
    certificate: CertificateDer<'static>,
    closed: bool,
}

impl EidChannel for MockChannel {
    fn get(&mut self, request: &HttpRequest) -> anyhow::Result<HttpResponseParts> {
        let response = self
            .inner
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no route configured for {}", request.url))?;
        Ok(HttpResponseParts {
            status: response.status,
            reason: None,
            location: response.location,
            set_cookies: response.set_cookies,
            body: response.body,
        })
    }

    fn peer_certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl HttpTransport for MockProvider {
    async fn connect(&self, url: &Url, _pkix_verify: bool) -> anyhow::Result<TlsSession> {
        let response = self.response_for(url)?;
        let certificate = CertificateDer::from(response.cert.clone());
        Ok(TlsSession {
            certificate: certificate.clone(),
            channel: Box::new(MockChannel { inner: self.0.clone(), certificate, closed: false }),
        })
    }
}

impl TlsDialer for MockProvider {
    async fn dial(
        &self, _endpoint: &TlsEndpoint, security: &ChannelSecurity,
    ) -> anyhow::Result<Box<dyn EidChannel>> {
        self.0.dials.lock().unwrap().push(security.clone());
        let certificate = CertificateDer::from(self.0.eservice_cert.lock().unwrap().clone());
        Ok(Box::new(MockChannel { inner: self.0.clone(), certificate, closed: false }))
    }
}

impl SalDispatcher for MockProvider {
    async fn create_session(&self) -> anyhow::Result<SalResponse<ConnectionHandle>> {
        Ok(SalResponse {
            result: ECardResult::ok(),
            payload: ConnectionHandle {
                context_handle: Some(vec![1; 16]),
                slot_handle: Some(vec![2; 24]),
                card_type: None,
            },
        })
    }

    async fn card_application_path(
        &self, handle: &ConnectionHandle,
    ) -> anyhow::Result<SalResponse<Vec<ConnectionHandle>>> {
        Ok(SalResponse { result: ECardResult::ok(), payload: vec![handle.clone()] })
    }

    async fn card_application_connect(
        &self, path: &ConnectionHandle,
    ) -> anyhow::Result<SalResponse<ConnectionHandle>> {
        Ok(SalResponse { result: ECardResult::ok(), payload: path.clone() })
    }

    async fn card_application_disconnect(
        &self, _handle: &ConnectionHandle,
    ) -> anyhow::Result<SalResponse<()>> {
        *self.0.disconnected.lock().unwrap() = true;
        Ok(SalResponse { result: ECardResult::ok(), payload: () })
    }
}

impl PaosTransport for MockProvider {
    async fn start_paos(
        &self, ctx: &ActivationContext, _channel: &mut dyn EidChannel, _token: &TcToken,
        _handle: &ConnectionHandle, _validator: &dyn DocumentValidator,
    ) -> Result<(), TaskFailure> {
        if let Some(description) = self.0.description.lock().unwrap().clone() {
            ctx.provide_eservice_description(description);
        }
        let behavior = self.0.paos.lock().unwrap().clone();
        match behavior {
            PaosBehavior::Succeed => Ok(()),
            PaosBehavior::FailECard(minor) => {
                Err(TaskError::ECard { result: ECardResult::error(minor, "exchange failed") }.into())
            }
            PaosBehavior::FailConnection(reason) => {
                Err(TaskError::Connection { reason }.into())
            }
            PaosBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

impl SchemaValidation for MockProvider {
    async fn management_validator(&self) -> anyhow::Result<Box<dyn DocumentValidator>> {
        Ok(Box::new(AcceptAllValidator))
    }
}

impl Config for MockProvider {}

impl Provider for MockProvider {}

/// Activation parameters with the given token URL.
pub fn params(token_url: &str) -> HashMap<String, String> {
    HashMap::from([("tcTokenURL".to_string(), token_url.to_string())])
}

/// A PAOS token document for the attached eID server case (same channel).
pub fn same_channel_token_xml(server: &str, refresh: &str, com_error: &str) -> String {
    format!(
        "<TCTokenType>
            <ServerAddress>{server}</ServerAddress>
            <SessionIdentifier>abc123</SessionIdentifier>
            <RefreshAddress>{refresh}</RefreshAddress>
            <CommunicationErrorAddress>{com_error}</CommunicationErrorAddress>
            <Binding>urn:liberty:paos:2006-08</Binding>
            <PathSecurity-Protocol></PathSecurity-Protocol>
        </TCTokenType>"
    )
}
