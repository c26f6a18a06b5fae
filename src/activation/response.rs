//! # Activation Response
//!
//! The structured result handed to the binding layer. Mutated while error
//! mapping proceeds and terminal once finished: `finish` appends the
//! TR-03124 result parameters to the refresh address.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::ecard::{self, ECardResult};
use crate::core::urlbuilder::{UrlBuilder, fix_result_minor};
use crate::error::{Error, RedirectMinor};
use crate::token::TcToken;

/// Terminal state of an activation as seen by the binding layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// The activation succeeded.
    Ok,

    /// The browser must be redirected to the carried location.
    Redirect,

    /// An internal error without browser-visible recovery.
    InternalError,

    /// The activation was interrupted.
    Interrupted,
}

/// Response of one activation.
#[derive(Clone, Debug, Serialize)]
pub struct TcTokenResponse {
    /// Terminal state of the activation.
    pub code: ResultCode,

    /// The eCard result reported outward.
    pub result: ECardResult,

    /// The refresh address the browser is sent to; rewritten to the final
    /// validated hop by refresh determination, then augmented with result
    /// parameters by [`finish`](Self::finish).
    pub refresh_address: Option<Url>,

    /// Additional result minor (full eCard URI) for diagnosability.
    pub additional_minor: Option<String>,

    /// Redirect location when no refresh address applies (error paths).
    pub redirect_location: Option<Url>,
}

impl TcTokenResponse {
    /// A fresh positive response for the verified token.
    #[must_use]
    pub fn new(token: &TcToken) -> Self {
        Self {
            code: ResultCode::Ok,
            result: ECardResult::ok(),
            refresh_address: Url::parse(&token.refresh_address).ok(),
            additional_minor: None,
            redirect_location: None,
        }
    }

    /// Replaces the eCard result.
    pub fn set_result(&mut self, result: ECardResult) {
        self.result = result;
    }

    /// Sets the additional result minor.
    pub fn set_additional_minor(&mut self, minor: impl Into<String>) {
        self.additional_minor = Some(minor.into());
    }

    /// Completes the response: appends `ResultMajor=ok` on success, or
    /// `ResultMajor=error&ResultMinor=<bare code>` on failure, to the
    /// refresh address, and mirrors it as the redirect location.
    pub fn finish(&mut self) {
        let Some(address) = self.refresh_address.clone() else {
            return;
        };
        let finished = if self.result.is_ok() {
            UrlBuilder::from_url(&address).query_param("ResultMajor", "ok").build()
        } else {
            if self.code == ResultCode::Ok {
                self.code = ResultCode::Redirect;
            }
            let minor = self.result.minor.as_deref().unwrap_or(ecard::minor::app::UNKNOWN_ERROR);
            UrlBuilder::from_url(&address)
                .query_param("ResultMajor", "error")
                .query_param("ResultMinor", fix_result_minor(minor))
                .build()
        };
        self.refresh_address = Some(finished.clone());
        self.redirect_location = Some(finished);
    }

    /// Builds a redirect response from an error that carries a safe
    /// redirect URL. Errors without one cannot be turned into a response
    /// and must be reported out-of-band.
    #[must_use]
    pub fn from_error(error: &Error) -> Option<Self> {
        let redirect = error.redirect()?.clone();
        let minor = match error {
            Error::UserCancelled { .. } => RedirectMinor::CancellationByUser,
            Error::SecurityViolation { .. } => RedirectMinor::CommunicationError,
            Error::InvalidElement { .. } | Error::AuthServer { .. } => {
                RedirectMinor::CommunicationError
            }
            _ => RedirectMinor::ClientError,
        };
        Some(Self {
            code: ResultCode::Redirect,
            result: ECardResult::error(minor.code(), error.to_string()),
            refresh_address: None,
            additional_minor: None,
            redirect_location: Some(redirect),
        })
    }
}
