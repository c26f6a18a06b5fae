//! # TCToken Types
//!
//! The token document as handed out by the eService, plus the enumerations
//! for its `Binding` and `PathSecurity-Protocol` identifiers. Field values
//! are kept verbatim as received; interpretation happens through the
//! accessor methods so the verifier can reject unknown identifiers with a
//! precise error.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::ecard;
use crate::core::urlbuilder::with_error_params;

/// Transport binding requested by the token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    /// Reverse SOAP (PAOS) binding carrying eCard API messages.
    Paos,

    /// Plain HTTPS GET binding.
    Http,
}

impl Binding {
    /// Maps a binding URI to its enum value. Unknown URIs yield `None`.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            ecard::BINDING_PAOS => Some(Self::Paos),
            ecard::BINDING_HTTP => Some(Self::Http),
            _ => None,
        }
    }
}

/// Path security protocol requested by the token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSecurityProtocol {
    /// TLS with a pre-shared key.
    TlsPsk,

    /// Mutually authenticated TLS.
    MutualTls,
}

impl PathSecurityProtocol {
    /// Maps a path security protocol URI to its enum value. Unknown URIs
    /// yield `None`.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            ecard::PATH_SEC_PROTO_TLS_PSK | ecard::PATH_SEC_PROTO_TLS_RSA_PSK => Some(Self::TlsPsk),
            ecard::PATH_SEC_PROTO_MTLS | ecard::PATH_SEC_PROTO_MTLS_LEGACY => {
                Some(Self::MutualTls)
            }
            _ => None,
        }
    }
}

/// The `PathSecurity-Parameters` element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSecurityParameters {
    /// Decoded pre-shared key bytes.
    pub psk: Vec<u8>,
}

/// A TCToken as issued by an eID service.
///
/// Constructed once per activation by the parser, immutable after
/// verification, consumed by the channel selector and the orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcToken {
    /// Address of the eID server (https).
    pub server_address: String,

    /// Opaque session identifier.
    pub session_identifier: String,

    /// Browser redirect target on success (https).
    pub refresh_address: String,

    /// Browser redirect target on communication errors (https, optional).
    pub communication_error_address: String,

    /// Transport binding URI.
    pub binding: String,

    /// Path security protocol URI.
    pub path_security_protocol: String,

    /// Path security parameters, absent when no usable PSK was present.
    pub path_security_parameters: Option<PathSecurityParameters>,

    /// Card types the eService accepts for this authentication.
    pub allowed_card_types: Vec<String>,

    /// Set when the PSK was present but not decodable (odd length or
    /// non-hex content); verification turns this into a recoverable error.
    pub invalid_psk: bool,
}

impl TcToken {
    /// The parsed transport binding, `None` for unknown identifiers.
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        Binding::from_uri(&self.binding)
    }

    /// The parsed path security protocol, `None` when empty or unknown.
    #[must_use]
    pub fn path_security(&self) -> Option<PathSecurityProtocol> {
        PathSecurityProtocol::from_uri(&self.path_security_protocol)
    }

    /// The pre-shared key bytes, when present and non-empty.
    #[must_use]
    pub fn psk(&self) -> Option<&[u8]> {
        self.path_security_parameters
            .as_ref()
            .map(|p| p.psk.as_slice())
            .filter(|psk| !psk.is_empty())
    }

    /// Checks if the token is a response to an error. These tokens only
    /// contain the `CommunicationErrorAddress` field; the refresh address
    /// is essential, so a token without one must be an error token.
    #[must_use]
    pub fn is_error_token(&self) -> bool {
        !self.communication_error_address.is_empty() && self.refresh_address.is_empty()
    }

    /// Whether the PAOS/HTTP exchange must reuse the TLS channel the token
    /// was retrieved over: no path security protocol given, or TLS-PSK
    /// requested without any PSK value.
    #[must_use]
    pub fn requires_same_channel(&self) -> bool {
        if self.path_security_protocol.is_empty() {
            return true;
        }
        if self.path_security() == Some(PathSecurityProtocol::TlsPsk) {
            return self.psk().is_none();
        }
        false
    }

    /// The `CommunicationErrorAddress` augmented with
    /// `ResultMajor=error&ResultMinor=<bare code>`. `None` when the
    /// address is absent or unusable as a URL.
    #[must_use]
    pub fn com_error_address_with_params(&self, minor: &str) -> Option<Url> {
        if self.communication_error_address.is_empty() {
            return None;
        }
        let url = Url::parse(&self.communication_error_address).ok()?;
        Some(with_error_params(&url, minor, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ecard::minor;

    #[test]
    fn error_token_requires_missing_refresh_address() {
        let mut token = TcToken {
            communication_error_address: "https://service.example/error".into(),
            ..TcToken::default()
        };
        assert!(token.is_error_token());

        token.refresh_address = "https://service.example/done".into();
        assert!(!token.is_error_token());

        token.communication_error_address.clear();
        assert!(!token.is_error_token());
    }

    #[test]
    fn same_channel_for_empty_path_security() {
        let token = TcToken::default();
        assert!(token.requires_same_channel());
    }

    #[test]
    fn same_channel_for_psk_protocol_without_psk() {
        let token = TcToken {
            path_security_protocol: crate::core::ecard::PATH_SEC_PROTO_TLS_PSK.into(),
            ..TcToken::default()
        };
        assert!(token.requires_same_channel());
    }

    #[test]
    fn no_same_channel_with_psk_value() {
        let token = TcToken {
            path_security_protocol: crate::core::ecard::PATH_SEC_PROTO_TLS_PSK.into(),
            path_security_parameters: Some(PathSecurityParameters { psk: vec![0xab, 0xcd] }),
            ..TcToken::default()
        };
        assert!(!token.requires_same_channel());
    }

    #[test]
    fn no_same_channel_for_mutual_tls() {
        let token = TcToken {
            path_security_protocol: crate::core::ecard::PATH_SEC_PROTO_MTLS.into(),
            ..TcToken::default()
        };
        assert!(!token.requires_same_channel());
    }

    #[test]
    fn com_error_address_carries_error_params() {
        let token = TcToken {
            communication_error_address: "https://service.example/error".into(),
            ..TcToken::default()
        };
        let url = token
            .com_error_address_with_params(minor::app::COMMUNICATION_ERROR)
            .expect("address is set");
        assert_eq!(
            url.as_str(),
            "https://service.example/error?ResultMajor=error&ResultMinor=communicationError"
        );
        assert!(TcToken::default().com_error_address_with_params("x").is_none());
    }
}
