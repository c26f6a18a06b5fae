//! # TLS Channel Selection
//!
//! Decides how the channel to the eID server is secured: reuse of the TLS
//! session the token was retrieved over, a PSK-bound channel keyed by the
//! session identifier, or a fresh mutually authenticated connection. The
//! decision is made once per activation; two certificate checks are layered
//! on every established connection regardless of the branch taken.

use rustls_pki_types::CertificateDer;
use url::Url;

use crate::activation::ActivationContext;
use crate::core::ecard::NPA_CARD_TYPE;
use crate::error::{Error, Result};
use crate::provider::{ConnectionHandle, EidChannel, TlsDialer};
use crate::resource::ResourceContext;
use crate::token::{PathSecurityProtocol, TcToken};

/// How the channel to the eID server is secured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelSecurity {
    /// Reuse the TLS channel the token was retrieved over. When the
    /// original channel is gone, session resumption is attempted instead
    /// of a fresh handshake.
    SameChannel {
        /// Force resumption of the previous TLS session on reconnect.
        enforce_same_session: bool,
    },

    /// TLS-PSK channel.
    Psk {
        /// PSK identity, the token's session identifier bytes.
        identity: Vec<u8>,
        /// Pre-shared key bytes.
        key: Vec<u8>,
    },

    /// Mutually authenticated TLS.
    MutualTls {
        /// Bind the smart-card credential for client authentication.
        card_credential: bool,
        /// Verify the server chain against the system trust store.
        pkix_verify: bool,
    },
}

/// Connection parameters of the eID server endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsEndpoint {
    /// Server host name.
    pub host: String,

    /// Resolved port (default substituted when the URL carries none).
    pub port: u16,

    /// Server name for SNI; suppressed for the nPA because eID servers
    /// frequently mishandle it.
    pub sni: Option<String>,

    /// Path and query of the request resource.
    pub resource: String,
}

/// Appends `sessionid=<session identifier>` to the server address unless a
/// `sessionid` query parameter is already present.
fn fix_server_address(address: &Url, session_identifier: &str) -> Url {
    let already = address.query_pairs().any(|(k, _)| k == "sessionid");
    if already {
        return address.clone();
    }
    let mut fixed = address.clone();
    fixed.query_pairs_mut().append_pair("sessionid", session_identifier);
    fixed
}

/// Sets up and opens the secured channel for the binding task.
pub struct TlsConnectionHandler {
    security: ChannelSecurity,
    endpoint: TlsEndpoint,
    server_address: Url,
    reused: Option<Box<dyn EidChannel>>,
    pinned: Option<CertificateDer<'static>>,
}

impl std::fmt::Debug for TlsConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnectionHandler")
            .field("security", &self.security)
            .field("endpoint", &self.endpoint)
            .field("server_address", &self.server_address)
            .field("reused", &self.reused.is_some())
            .finish()
    }
}

impl TlsConnectionHandler {
    /// Evaluates the channel decision tree for the verified token.
    ///
    /// Same-channel tokens take over the token-retrieval channel and record
    /// the same-channel flag in the activation context; all other tokens
    /// release the token stream and configure a fresh PSK or mTLS client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] for an unusable server address, a PSK
    /// protocol without key material, or an unknown security protocol.
    pub fn set_up(
        token: &TcToken, token_resource: &mut ResourceContext, ctx: &ActivationContext,
        handle: &ConnectionHandle, pkix_disabled: bool,
    ) -> Result<Self> {
        let session_id = token.session_identifier.as_str();
        let server_address = Url::parse(&token.server_address).map_err(|e| Error::Connection {
            reason: format!("unusable ServerAddress `{}`: {e}", token.server_address),
        })?;
        let server_host = server_address
            .host_str()
            .ok_or_else(|| Error::Connection {
                reason: format!("ServerAddress `{}` has no host", token.server_address),
            })?
            .to_string();

        let server_address = fix_server_address(&server_address, session_id);

        let card_type = handle
            .card_type
            .clone()
            .or_else(|| ctx.card_type())
            .unwrap_or_else(|| NPA_CARD_TYPE.to_string());
        // eID servers usually have problems with SNI, so disable it for them
        let no_sni = card_type == NPA_CARD_TYPE;

        let port = server_address.port_or_known_default().unwrap_or(443);
        let resource = match server_address.query() {
            Some(query) => format!("{}?{query}", server_address.path()),
            None => server_address.path().to_string(),
        };
        let endpoint = TlsEndpoint {
            host: server_host.clone(),
            port,
            sni: (!no_sni).then_some(server_host),
            resource,
        };

        if token.requires_same_channel() {
            ctx.set_same_channel(true);
            let pinned = token_resource.hops().last().map(|hop| hop.certificate.clone());
            let reused = token_resource.take_channel();
            return Ok(Self {
                security: ChannelSecurity::SameChannel { enforce_same_session: true },
                endpoint,
                server_address,
                reused,
                pinned,
            });
        }

        // a new channel will be established, the token stream is done
        token_resource.close_stream();

        let security = match token.path_security() {
            Some(PathSecurityProtocol::TlsPsk) => {
                let psk = token.psk().ok_or_else(|| Error::Connection {
                    reason: "TLS-PSK requested but no PSK is available".to_string(),
                })?;
                ChannelSecurity::Psk { identity: session_id.as_bytes().to_vec(), key: psk.to_vec() }
            }
            Some(PathSecurityProtocol::MutualTls) => ChannelSecurity::MutualTls {
                card_credential: true,
                pkix_verify: !pkix_disabled,
            },
            None => {
                return Err(Error::Connection {
                    reason: format!(
                        "unknown security protocol `{}` requested",
                        token.path_security_protocol
                    ),
                });
            }
        };

        Ok(Self { security, endpoint, server_address, reused: None, pinned: None })
    }

    /// The selected channel security.
    #[must_use]
    pub fn security(&self) -> &ChannelSecurity {
        &self.security
    }

    /// The endpoint parameters of the eID server.
    #[must_use]
    pub fn endpoint(&self) -> &TlsEndpoint {
        &self.endpoint
    }

    /// The fixed-up server address the binding task talks to.
    #[must_use]
    pub fn server_address(&self) -> &Url {
        &self.server_address
    }

    /// Returns a live channel to the eID server.
    ///
    /// Same-channel reuses the retrieval channel unless it reports closed,
    /// in which case a fresh handshake (with resumption enforced) is
    /// attempted; other securities always dial a new connection. On every
    /// connection the server identity is pinned for the lifetime of the
    /// activation and the observed eService certificate is recorded for
    /// the authentication step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when dialing fails and
    /// [`Error::SecurityViolation`] when the server identity changed
    /// between connections.
    pub async fn create_connection<D: TlsDialer>(
        &mut self, dialer: &D, ctx: &ActivationContext,
    ) -> Result<Box<dyn EidChannel>> {
        let channel = match self.reused.take() {
            Some(channel) if !channel.is_closed() => channel,
            _ => {
                tracing::debug!("performing TLS handshake with {}", self.endpoint.host);
                dialer
                    .dial(&self.endpoint, &self.security)
                    .await
                    .map_err(|e| Error::Connection { reason: e.to_string() })?
            }
        };

        let certificate = channel.peer_certificate().clone();
        if let Some(pinned) = &self.pinned {
            if pinned.as_ref() != certificate.as_ref() {
                return Err(Error::SecurityViolation {
                    reason: "eID server certificate changed between connections".to_string(),
                    redirect: None,
                });
            }
        } else {
            self.pinned = Some(certificate.clone());
        }
        ctx.record_eservice_certificate(certificate);

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ecard;
    use crate::token::PathSecurityParameters;

    fn empty_resource() -> ResourceContext {
        ResourceContext::new(None, Vec::new(), None)
    }

    fn paos_token() -> TcToken {
        TcToken {
            server_address: "https://eid.example/paos".into(),
            session_identifier: "abc123".into(),
            refresh_address: "https://sp.example/done".into(),
            binding: ecard::BINDING_PAOS.into(),
            ..TcToken::default()
        }
    }

    #[test]
    fn fix_server_address_appends_sessionid_once() {
        let url = Url::parse("https://eid.example/paos").expect("static URL");
        let fixed = fix_server_address(&url, "abc123");
        assert_eq!(fixed.as_str(), "https://eid.example/paos?sessionid=abc123");
        // never twice
        assert_eq!(fix_server_address(&fixed, "abc123"), fixed);

        let with_query = Url::parse("https://eid.example/paos?x=1").expect("static URL");
        assert_eq!(
            fix_server_address(&with_query, "abc123").as_str(),
            "https://eid.example/paos?x=1&sessionid=abc123"
        );
    }

    #[test]
    fn empty_path_security_forces_same_channel() {
        let ctx = ActivationContext::new();
        let mut resource = empty_resource();
        let handler = TlsConnectionHandler::set_up(
            &paos_token(),
            &mut resource,
            &ctx,
            &ConnectionHandle::default(),
            false,
        )
        .expect("set up succeeds");

        assert_eq!(
            handler.security(),
            &ChannelSecurity::SameChannel { enforce_same_session: true }
        );
        assert!(ctx.is_same_channel());
    }

    #[test]
    fn psk_protocol_builds_psk_client_keyed_by_session() {
        let ctx = ActivationContext::new();
        let mut token = paos_token();
        token.path_security_protocol = ecard::PATH_SEC_PROTO_TLS_PSK.into();
        token.path_security_parameters =
            Some(PathSecurityParameters { psk: vec![0x4b, 0xc1, 0xa0, 0xb5] });

        let mut resource = empty_resource();
        let handler = TlsConnectionHandler::set_up(
            &token,
            &mut resource,
            &ctx,
            &ConnectionHandle::default(),
            false,
        )
        .expect("set up succeeds");

        assert_eq!(
            handler.security(),
            &ChannelSecurity::Psk {
                identity: b"abc123".to_vec(),
                key: vec![0x4b, 0xc1, 0xa0, 0xb5],
            }
        );
        assert!(!ctx.is_same_channel());
    }

    #[test]
    fn mutual_tls_protocol_builds_certificate_client() {
        let ctx = ActivationContext::new();
        let mut token = paos_token();
        token.path_security_protocol = ecard::PATH_SEC_PROTO_MTLS.into();
        // any parameters force the non-same-channel branch
        token.path_security_parameters = Some(PathSecurityParameters { psk: vec![1] });

        let mut resource = empty_resource();
        let handler = TlsConnectionHandler::set_up(
            &token,
            &mut resource,
            &ctx,
            &ConnectionHandle::default(),
            true,
        )
        .expect("set up succeeds");

        assert_eq!(
            handler.security(),
            &ChannelSecurity::MutualTls { card_credential: true, pkix_verify: false }
        );
    }

    #[test]
    fn unknown_protocol_is_a_connection_error() {
        let ctx = ActivationContext::new();
        let mut token = paos_token();
        token.path_security_protocol = "urn:example:bogus".into();
        token.path_security_parameters = Some(PathSecurityParameters { psk: vec![1, 2] });

        let mut resource = empty_resource();
        let err = TlsConnectionHandler::set_up(
            &token,
            &mut resource,
            &ctx,
            &ConnectionHandle::default(),
            false,
        )
        .expect_err("must fail");
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    fn sni_is_suppressed_for_npa() {
        let ctx = ActivationContext::new();
        let mut resource = empty_resource();
        let handle =
            ConnectionHandle { card_type: Some(NPA_CARD_TYPE.to_string()), ..Default::default() };
        let handler =
            TlsConnectionHandler::set_up(&paos_token(), &mut resource, &ctx, &handle, false)
                .expect("set up succeeds");
        assert!(handler.endpoint().sni.is_none());

        let mut resource = empty_resource();
        let other =
            ConnectionHandle { card_type: Some("http://example.org/other".into()), ..Default::default() };
        let handler =
            TlsConnectionHandler::set_up(&paos_token(), &mut resource, &ctx, &other, false)
                .expect("set up succeeds");
        assert_eq!(handler.endpoint().sni.as_deref(), Some("eid.example"));
    }
}
