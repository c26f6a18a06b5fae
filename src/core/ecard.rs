//! # eCard API Constants
//!
//! Wire constants defined in BSI TR-03112-1: result major/minor URIs,
//! transport binding identifiers, and path security protocol identifiers.
//! Values are fixed by the specification and must not be altered.

use serde::{Deserialize, Serialize};

/// Card type URI of the German eID card (nPA).
pub const NPA_CARD_TYPE: &str = "http://bsi.bund.de/cif/npa.xml";

/// PAOS transport binding identifier.
pub const BINDING_PAOS: &str = "urn:liberty:paos:2006-08";

/// Plain HTTP transport binding identifier.
pub const BINDING_HTTP: &str = "urn:ietf:rfc:2616";

/// TLS-PSK path security protocol.
pub const PATH_SEC_PROTO_TLS_PSK: &str = "urn:ietf:rfc:4279";

/// TLS-RSA-PSK path security protocol.
pub const PATH_SEC_PROTO_TLS_RSA_PSK: &str = "urn:ietf:rfc:5487";

/// Mutually authenticated TLS 1.2 path security protocol.
pub const PATH_SEC_PROTO_MTLS: &str = "urn:ietf:rfc:5246";

/// Mutually authenticated TLS 1.1 path security protocol (legacy).
pub const PATH_SEC_PROTO_MTLS_LEGACY: &str = "urn:ietf:rfc:4346";

/// Result major URIs.
pub mod major {
    /// The request succeeded.
    pub const OK: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultmajor#ok";
    /// The request failed.
    pub const ERROR: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultmajor#error";
    /// The request succeeded with warnings.
    pub const WARNING: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultmajor#warning";
}

/// Internal result minor URIs used by the error-mapping table.
pub mod minor {
    /// Application layer (`al`) minors.
    pub mod app {
        /// An unknown error occurred.
        pub const UNKNOWN_ERROR: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#unknownError";
        /// An internal error occurred.
        pub const INT_ERROR: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#internalError";
        /// A parameter was malformed or out of range.
        pub const INCORRECT_PARM: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#incorrectParameter";
        /// Communication with a remote party failed.
        pub const COMMUNICATION_ERROR: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#communicationError";
        /// The session was terminated.
        pub const SESS_TERMINATED: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#SessionTerminatedWarning";
    }

    /// Dispatcher (`dp`) minors.
    pub mod dp {
        /// A timeout occurred.
        pub const TIMEOUT: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/dp#timeoutError";
        /// Communication failed at the transport layer.
        pub const COMM_ERROR: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/dp#communicationError";
    }

    /// Service access layer (`sal`) minors.
    pub mod sal {
        /// The user cancelled the operation.
        pub const CANCELLATION_BY_USER: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#cancellationByUser";
        /// Preconditions of the call were not satisfied.
        pub const PREREQUISITES_NOT_SATISFIED: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#prerequisitesNotSatisfied";
        /// The connection handle is unknown.
        pub const UNKNOWN_HANDLE: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#unknownConnectionHandle";

        /// Support minors.
        pub mod support {
            /// Schema validation of a document failed.
            pub const SCHEMA_VALIDATION_FAILED: &str =
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal/support#schemaValidationError";
        }

        /// Extended access control minors.
        pub mod eac {
            /// Verification of the document validity failed.
            pub const DOC_VALID_FAILED: &str =
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal/mEAC#DocumentValidityVerificationFailed";
        }
    }

    /// Interface device layer (`ifdl`) minors.
    pub mod ifd {
        /// The user cancelled the operation at the terminal.
        pub const CANCELLATION_BY_USER: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/ifdl#cancellationByUser";
        /// The slot handle is invalid (card removed).
        pub const INVALID_SLOT_HANDLE: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/ifdl/common#invalidSlotHandle";
        /// The password (PIN) is blocked.
        pub const PASSWORD_BLOCKED: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/ifdl/passwordBlocked";
        /// The password (PIN) is deactivated.
        pub const PASSWORD_DEACTIVATED: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/ifdl/passwordDeactivated";
        /// An unknown terminal error occurred.
        pub const UNKNOWN_ERROR: &str =
            "http://www.bsi.bund.de/ecard/api/1.1/resultminor/ifdl/unknownError";
    }
}

/// An eCard API result: major status URI, optional minor URI or code, and
/// an optional human readable message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ECardResult {
    /// Result major URI.
    pub major: String,

    /// Result minor, either a full URI or a bare TR-03124 code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor: Option<String>,

    /// Human readable result message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ECardResult {
    /// A positive result.
    #[must_use]
    pub fn ok() -> Self {
        Self { major: major::OK.to_string(), minor: None, message: None }
    }

    /// An error result with the given minor and message.
    pub fn error(minor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            major: major::ERROR.to_string(),
            minor: Some(minor.into()),
            message: Some(message.into()),
        }
    }

    /// Whether the result major signals success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.major == major::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_constructors() {
        assert!(ECardResult::ok().is_ok());
        let err = ECardResult::error(minor::app::COMMUNICATION_ERROR, "no route");
        assert!(!err.is_ok());
        assert_eq!(err.minor.as_deref(), Some(minor::app::COMMUNICATION_ERROR));
    }
}
