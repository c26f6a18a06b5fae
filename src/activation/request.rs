//! # Activation Request
//!
//! Extracts the activation parameters supplied by the browser, retrieves
//! the TCToken and wraps the verified result. Only `tcTokenURL` is
//! interpreted; all other parameters are logged and ignored.

use std::collections::HashMap;

use url::Url;

use crate::core::ecard::BINDING_PAOS;
use crate::error::{Error, Result};
use crate::provider::{Config, Provider};
use crate::resource::TcTokenContext;
use crate::token::TcToken;

use super::context::ActivationContext;

const TC_TOKEN_URL_KEY: &str = "tcTokenURL";

/// A TCToken request: the verified token plus the retrieval context used
/// later for same-channel decisions.
#[derive(Debug)]
pub struct TcTokenRequest {
    token_ctx: TcTokenContext,
}

impl TcTokenRequest {
    /// Evaluates the request parameters, fetches the token document from
    /// the `tcTokenURL` and verifies it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingActivationParameter`] without a usable
    /// `tcTokenURL`, [`Error::InvalidTcTokenUrl`] when it does not parse,
    /// and any retrieval or verification error.
    pub async fn fetch<P: Provider>(
        provider: &P, ctx: &ActivationContext, parameters: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut token_url = None;
        for (key, value) in parameters {
            if value.is_empty() {
                tracing::info!("skipping query parameter '{key}' because it does not contain a value");
            } else if key == TC_TOKEN_URL_KEY {
                token_url = Some(value.as_str());
            } else {
                tracing::info!("unknown query element: {key}");
            }
        }
        let Some(token_url) = token_url else {
            return Err(Error::MissingActivationParameter(TC_TOKEN_URL_KEY));
        };

        let token_url = Url::parse(token_url)
            .map_err(|_| Error::InvalidTcTokenUrl { url: token_url.to_string() })?;
        ctx.set_token_url(token_url.clone());

        let token_ctx = TcTokenContext::fetch(provider, ctx, &token_url).await?;
        Ok(Self { token_ctx })
    }

    /// The verified token.
    #[must_use]
    pub fn token(&self) -> &TcToken {
        self.token_ctx.token()
    }

    /// The token retrieval context.
    pub fn token_ctx(&mut self) -> &mut TcTokenContext {
        &mut self.token_ctx
    }

    /// Whether checks according to BSI TR-03112-7 3.4.2, 3.4.4 and 3.4.5
    /// must be performed. Only PAOS activations authenticate against the
    /// nPA; developer mode disables the checks entirely.
    #[must_use]
    pub fn perform_tr03112_checks(&self, config: &impl Config) -> bool {
        let is_npa = self.token().binding == BINDING_PAOS;
        if !is_npa {
            false
        } else if config.developer_mode() {
            tracing::warn!("developer mode: all TR-03124-1 security checks are disabled");
            false
        } else {
            true
        }
    }
}
