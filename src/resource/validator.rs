//! # Redirect Certificate Validation
//!
//! The per-hop validator applied while following redirects. For nPA
//! activations it enforces certificate pinning against the eService
//! `CertificateDescription` and decides, via the same-origin policy,
//! whether the current hop is the final destination.

use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use url::Url;

use crate::activation::ActivationContext;
use crate::core::origin::check_same_origin;

/// Decision of a validator step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Keep following redirects.
    Continue,

    /// Stop, this hop is the destination.
    Finish,
}

/// Error raised when a hop fails validation. Redirect following stops
/// immediately; security violations are never silently continued.
#[derive(Clone, Debug, thiserror::Error)]
#[error("certificate validation failed at {origin}: {reason}")]
pub struct ValidationError {
    /// `scheme://host:port` of the offending hop.
    pub origin: String,

    /// Violated rule.
    pub reason: String,
}

/// Per-hop certificate validator used by the resource loader.
pub trait CertificateValidator {
    /// Validates one hop, given its URL and the server's DER leaf
    /// certificate.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the hop violates the pinning or
    /// redirect rules.
    fn step(
        &mut self, url: &Url, certificate: &CertificateDer<'static>,
    ) -> Result<ValidationOutcome, ValidationError>;
}

/// The eService certificate description, consumed read-only. Produced by
/// the EAC step from the on-card certificate structures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateDescription {
    /// Subject URL of the eService, the same-origin reference point when
    /// present.
    pub subject_url: Option<String>,

    /// SHA-256 hashes of the communication certificates the eService has
    /// declared (pinned set).
    pub comm_certificates: Vec<Vec<u8>>,
}

impl CertificateDescription {
    /// Whether the SHA-256 hash of `certificate` appears in the pinned set.
    #[must_use]
    pub fn pins_certificate(&self, certificate: &CertificateDer<'static>) -> bool {
        let hash = Sha256::digest(certificate.as_ref());
        self.comm_certificates.iter().any(|pin| pin.as_slice() == hash.as_slice())
    }
}

fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}

/// TR-03112 redirect validator.
///
/// State machine advanced once per hop: redirects are followed as long as
/// the hop's certificate hash is contained in the pinned set; once the hop
/// URL and the same-origin reference conform to the SOP, the destination
/// is reached. SOP success is monotonic within one activation, so the
/// first match terminates the chain.
pub struct RedirectCertificateValidator<'a> {
    ctx: &'a ActivationContext,
    checks_enabled: bool,
    previous: Option<Url>,
}

impl<'a> RedirectCertificateValidator<'a> {
    /// Creates a validator. With `checks_enabled` false (non-nPA
    /// activation) the first hop is accepted unconditionally and the
    /// browser performs any further redirects itself.
    #[must_use]
    pub fn new(ctx: &'a ActivationContext, checks_enabled: bool) -> Self {
        Self { ctx, checks_enabled, previous: None }
    }
}

impl CertificateValidator for RedirectCertificateValidator<'_> {
    fn step(
        &mut self, url: &Url, certificate: &CertificateDer<'static>,
    ) -> Result<ValidationOutcome, ValidationError> {
        if !self.checks_enabled {
            return Ok(ValidationOutcome::Finish);
        }

        // Certificate pinning once the eService description is known. The
        // description promise is peeked without blocking; before the EAC
        // step has produced it there is nothing to pin against.
        if let Some(description) = self.ctx.eservice_description() {
            if !description.pins_certificate(certificate) {
                return Err(ValidationError {
                    origin: origin_of(url),
                    reason: "server certificate hash is not contained in CommCertificates"
                        .to_string(),
                });
            }
        }

        let reference = self
            .ctx
            .eservice_description()
            .and_then(|d| d.subject_url)
            .filter(|s| !s.is_empty())
            .and_then(|s| Url::parse(&s).ok())
            .or_else(|| self.ctx.token_url());
        let Some(reference) = reference else {
            return Err(ValidationError {
                origin: origin_of(url),
                reason: "no same-origin reference available".to_string(),
            });
        };

        if check_same_origin(url, &reference) {
            Ok(ValidationOutcome::Finish)
        } else {
            tracing::debug!(
                "hop {url} (previous hop {:?}) does not conform to the SOP reference {reference}",
                self.previous
            );
            self.previous = Some(url.clone());
            Ok(ValidationOutcome::Continue)
        }
    }
}
