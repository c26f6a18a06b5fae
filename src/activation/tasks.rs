//! # Binding Tasks
//!
//! The transport-specific work of one activation, run on a background
//! worker: the PAOS exchange or the plain TLS-authenticated HTTP GET.
//! The card is disconnected on every exit path.

use std::sync::Arc;

use crate::channel::TlsConnectionHandler;
use crate::error::{TaskError, TaskFailure};
use crate::provider::{
    AcceptAllValidator, ConnectionHandle, DocumentValidator, HttpRequest, Provider,
};
use crate::resource::loader::{ACCEPT_CHARSET_HEADER, ACCEPT_HEADER};
use crate::token::{Binding, TcToken};

use super::context::ActivationContext;

/// The transport-specific task dispatched for one activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingTask {
    /// Reverse SOAP exchange carrying the eCard API conversation.
    Paos,

    /// Plain HTTPS GET authenticating the user over the TLS channel.
    HttpGet,
}

impl BindingTask {
    /// Selects the task for a verified binding.
    #[must_use]
    pub const fn for_binding(binding: Binding) -> Self {
        match binding {
            Binding::Paos => Self::Paos,
            Binding::Http => Self::HttpGet,
        }
    }

    /// Worker name used in log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Paos => "PAOS",
            Self::HttpGet => "TLS Auth",
        }
    }
}

/// Runs the binding task to completion, disconnecting the card afterwards
/// regardless of the outcome.
pub(crate) async fn run<P: Provider>(
    task: BindingTask, provider: P, ctx: Arc<ActivationContext>, token: TcToken,
    mut tls: TlsConnectionHandler, handle: ConnectionHandle,
) -> Result<(), TaskFailure> {
    tracing::debug!("starting {} binding task", task.name());
    let result = match task {
        BindingTask::Paos => run_paos(&provider, &ctx, &token, &mut tls, &handle).await,
        BindingTask::HttpGet => run_http_get(&provider, &ctx, &mut tls).await,
    };

    // disconnect card after authentication, on every exit path
    if let Err(e) = provider.card_application_disconnect(&handle).await {
        tracing::warn!("failed to disconnect card: {e}");
    }

    result
}

async fn run_paos<P: Provider>(
    provider: &P, ctx: &ActivationContext, token: &TcToken, tls: &mut TlsConnectionHandler,
    handle: &ConnectionHandle,
) -> Result<(), TaskFailure> {
    let mut channel = tls
        .create_connection(provider, ctx)
        .await
        .map_err(|e| TaskFailure::from(TaskError::Connection { reason: e.to_string() }))?;

    let validator = load_schema_validator(provider).await;
    let result = provider.start_paos(ctx, channel.as_mut(), token, handle, validator.as_ref()).await;
    channel.close();
    result
}

async fn run_http_get<P: Provider>(
    provider: &P, ctx: &ActivationContext, tls: &mut TlsConnectionHandler,
) -> Result<(), TaskFailure> {
    let mut channel = tls
        .create_connection(provider, ctx)
        .await
        .map_err(|e| TaskFailure::from(TaskError::Connection { reason: e.to_string() }))?;

    let request = HttpRequest::get(tls.server_address().clone())
        .header("Accept", ACCEPT_HEADER)
        .header("Accept-Charset", ACCEPT_CHARSET_HEADER);
    let response = channel
        .get(&request)
        .map_err(|e| TaskFailure::from(TaskError::Connection { reason: e.to_string() }))?;
    channel.close();

    if !(200..300).contains(&response.status) {
        return Err(TaskError::Connection {
            reason: format!("authentication endpoint answered with status {}", response.status),
        }
        .into());
    }
    Ok(())
}

/// Loads the management schema validator lazily, degrading to a validator
/// that accepts everything when none is available or validation has been
/// switched off through `legacy.invalid_schema`.
async fn load_schema_validator<P: Provider>(provider: &P) -> Box<dyn DocumentValidator> {
    if provider.legacy_invalid_schema() {
        tracing::warn!("schema validation is disabled");
        return Box::new(AcceptAllValidator);
    }
    match provider.management_validator().await {
        Ok(validator) => validator,
        Err(e) => {
            tracing::warn!("no schema validator available, skipping schema validation: {e}");
            Box::new(AcceptAllValidator)
        }
    }
}
