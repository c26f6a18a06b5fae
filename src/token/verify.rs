//! # TCToken Verification
//!
//! The ordered rule engine validating token fields per TR-03112. The check
//! order is load-bearing: later checks assume earlier ones have already
//! produced a safe redirect target, so it must not be rearranged.

use url::Url;

use crate::activation::ActivationContext;
use crate::core::ecard::minor;
use crate::core::origin::check_same_origin;
use crate::core::urlbuilder::with_error_params;
use crate::error::{ElementFault, Error, RedirectMinor, Result};
use crate::provider::Provider;
use crate::resource::{RedirectCertificateValidator, ResourceContext, ResourceLoader};

use super::types::{PathSecurityProtocol, TcToken};

/// Why the refresh-address recovery path was entered.
enum RecoveryCause {
    Element { element: &'static str, fault: ElementFault },
    Cancellation { message: String },
}

/// Verifier for the elements of a TCToken.
pub struct TcTokenVerifier<'a> {
    token: &'a TcToken,
    ctx: &'a ResourceContext,
}

impl<'a> TcTokenVerifier<'a> {
    /// Creates a verifier for `token`, which was retrieved over `ctx`.
    #[must_use]
    pub fn new(token: &'a TcToken, ctx: &'a ResourceContext) -> Self {
        Self { token, ctx }
    }

    /// Checks if the token is a response to an error. These tokens only
    /// contain the `CommunicationErrorAddress` field.
    #[must_use]
    pub fn is_error_token(&self) -> bool {
        self.token.is_error_token()
    }

    /// Verifies the elements of the TCToken.
    ///
    /// # Errors
    ///
    /// Returns a validation error on the first violated rule. Recoverable
    /// violations carry a redirect URL resolved through the refresh
    /// address (or the communication error address as fallback).
    pub async fn verify_url_token<P: Provider>(
        &self, provider: &P, actx: &ActivationContext,
    ) -> Result<()> {
        // ordering is load-bearing: the first two checks secure the
        // redirect targets the later ones recover through
        self.initial_url_token_check()?;
        self.verify_refresh_address(provider, actx).await?;
        self.verify_communication_error_address()?;
        self.check_user_cancellation(provider, actx).await?;
        self.verify_server_address(provider, actx).await?;
        self.verify_session_identifier()?;
        self.verify_binding()?;
        self.verify_path_security(provider, actx).await?;
        Ok(())
    }

    /// Rejects tokens that are empty except for the
    /// `CommunicationErrorAddress`: the eService signalled a failure.
    fn initial_url_token_check(&self) -> Result<()> {
        let t = self.token;
        if !t.communication_error_address.is_empty()
            && t.refresh_address.is_empty()
            && t.server_address.is_empty()
            && t.session_identifier.is_empty()
            && t.binding.is_empty()
            && t.path_security_protocol.is_empty()
        {
            return Err(Error::AuthServer {
                redirect: t.com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
            });
        }
        Ok(())
    }

    async fn verify_refresh_address<P: Provider>(
        &self, provider: &P, actx: &ActivationContext,
    ) -> Result<()> {
        let value = &self.token.refresh_address;
        self.assert_required("RefreshAddress", value)?;
        if let Err(fault) = assert_https_url(value) {
            return Err(self
                .determine_refresh_address(
                    provider,
                    actx,
                    RecoveryCause::Element { element: "RefreshAddress", fault },
                )
                .await);
        }
        Ok(())
    }

    fn verify_communication_error_address(&self) -> Result<()> {
        let value = &self.token.communication_error_address;
        if !value.is_empty() {
            if let Err(fault) = assert_https_url(value) {
                return Err(Error::InvalidElement {
                    element: "CommunicationErrorAddress",
                    fault,
                    redirect: None,
                });
            }
        }
        Ok(())
    }

    async fn check_user_cancellation<P: Provider>(
        &self, provider: &P, actx: &ActivationContext,
    ) -> Result<()> {
        if let Some(message) = actx.user_cancellation() {
            return Err(self
                .determine_refresh_address(provider, actx, RecoveryCause::Cancellation { message })
                .await);
        }
        Ok(())
    }

    async fn verify_server_address<P: Provider>(
        &self, provider: &P, actx: &ActivationContext,
    ) -> Result<()> {
        let value = &self.token.server_address;
        if value.is_empty() {
            return Err(self
                .determine_refresh_address(
                    provider,
                    actx,
                    RecoveryCause::Element { element: "ServerAddress", fault: ElementFault::Missing },
                )
                .await);
        }
        if let Err(fault) = assert_https_url(value) {
            return Err(self
                .determine_refresh_address(
                    provider,
                    actx,
                    RecoveryCause::Element { element: "ServerAddress", fault },
                )
                .await);
        }
        Ok(())
    }

    fn verify_session_identifier(&self) -> Result<()> {
        self.assert_required("SessionIdentifier", &self.token.session_identifier)
    }

    fn verify_binding(&self) -> Result<()> {
        self.assert_required("Binding", &self.token.binding)?;
        if self.token.binding().is_none() {
            return Err(self.invalid_element("Binding", ElementFault::Invalid));
        }
        Ok(())
    }

    async fn verify_path_security<P: Provider>(
        &self, provider: &P, actx: &ActivationContext,
    ) -> Result<()> {
        let proto = &self.token.path_security_protocol;
        let params = &self.token.path_security_parameters;

        // TR-03124 sec. 2.4.3: without PathSecurity-Protocol/PSK the PAOS
        // connection MUST use the TLS channel the token was retrieved over
        if proto.is_empty() && params.is_none() {
            return self.assert_same_channel();
        }
        if !proto.is_empty()
            && self.token.path_security() == Some(PathSecurityProtocol::TlsPsk)
            && params.is_none()
            && !self.token.invalid_psk
        {
            return self.assert_same_channel();
        }

        self.assert_required("PathSecurityProtocol", proto)?;
        let Some(protocol) = self.token.path_security() else {
            return Err(self.invalid_element("PathSecurityProtocol", ElementFault::Invalid));
        };

        if protocol == PathSecurityProtocol::TlsPsk {
            if self.token.invalid_psk {
                return Err(self
                    .determine_refresh_address(
                        provider,
                        actx,
                        RecoveryCause::Element { element: "PSK", fault: ElementFault::Invalid },
                    )
                    .await);
            }
            if self.token.psk().is_none() {
                return Err(self
                    .determine_refresh_address(
                        provider,
                        actx,
                        RecoveryCause::Element {
                            element: "PathSecurityParameters",
                            fault: ElementFault::Missing,
                        },
                    )
                    .await);
            }
        }
        Ok(())
    }

    /// Checks that every hop of the token retrieval shares the origin of
    /// the PAOS address, so the exchange can stay on the same channel.
    fn assert_same_channel(&self) -> Result<()> {
        let paos_url = Url::parse(&self.token.server_address).map_err(|_| Error::InvalidElement {
            element: "ServerAddress",
            fault: ElementFault::MalformedUrl,
            redirect: None,
        })?;
        for hop in self.ctx.hops() {
            if !check_same_origin(&paos_url, &hop.url) {
                return Err(Error::SecurityViolation {
                    reason: "same origin policy is violated for the PAOS channel".to_string(),
                    redirect: self
                        .token
                        .com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
                });
            }
        }
        Ok(())
    }

    fn assert_required(&self, element: &'static str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(self.invalid_element(element, ElementFault::Missing));
        }
        Ok(())
    }

    fn invalid_element(&self, element: &'static str, fault: ElementFault) -> Error {
        Error::InvalidElement {
            element,
            fault,
            redirect: self.token.com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
        }
    }

    /// Determines the redirect URL after a recoverable validation failure:
    /// the declared refresh address is resolved through the redirect
    /// loader with pinning enforced, and its final hop (augmented with
    /// error parameters) becomes the redirect carried by the raised error.
    /// When the refresh address is unusable the communication error
    /// address is used instead.
    async fn determine_refresh_address<P: Provider>(
        &self, provider: &P, actx: &ActivationContext, cause: RecoveryCause,
    ) -> Error {
        let refresh = &self.token.refresh_address;
        if refresh.is_empty() {
            return match cause {
                RecoveryCause::Cancellation { .. } => Error::UserCancelled {
                    redirect: self
                        .token
                        .com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
                },
                RecoveryCause::Element { element, fault } => Error::InvalidElement {
                    element,
                    fault,
                    redirect: self
                        .token
                        .com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
                },
            };
        }

        let resolved = match Url::parse(refresh) {
            Ok(url) => {
                let mut validator = RedirectCertificateValidator::new(actx, true);
                let loader = ResourceLoader::new(provider, actx);
                match loader.load_with_validator(&url, &mut validator).await {
                    Ok(mut resource) => {
                        resource.close_stream();
                        resource.final_url().cloned()
                    }
                    Err(e) => {
                        tracing::warn!("refresh address could not be resolved: {e}");
                        None
                    }
                }
            }
            Err(_) => None,
        };

        let Some(final_url) = resolved else {
            // the refresh address is unusable, fall back to the
            // communication error address
            return match cause {
                RecoveryCause::Cancellation { .. } => Error::UserCancelled {
                    redirect: self
                        .token
                        .com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
                },
                RecoveryCause::Element { element, fault } => Error::InvalidElement {
                    element,
                    fault,
                    redirect: self
                        .token
                        .com_error_address_with_params(minor::app::COMMUNICATION_ERROR),
                },
            };
        };

        match cause {
            RecoveryCause::Cancellation { message } => Error::UserCancelled {
                redirect: Some(with_error_params(
                    &final_url,
                    RedirectMinor::CancellationByUser.code(),
                    Some(&message),
                )),
            },
            RecoveryCause::Element { element, fault } => Error::InvalidElement {
                element,
                fault,
                redirect: Some(with_error_params(
                    &final_url,
                    RedirectMinor::TrustedChannelEstablishmentFailed.code(),
                    Some(&format!("element {element} is {fault}")),
                )),
            },
        }
    }
}

/// Checks that `value` is an `https` URL.
fn assert_https_url(value: &str) -> std::result::Result<Url, ElementFault> {
    let url = Url::parse(value).map_err(|_| ElementFault::MalformedUrl)?;
    if url.scheme() != "https" {
        return Err(ElementFault::NotHttps);
    }
    Ok(url)
}
