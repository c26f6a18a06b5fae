//! # Activation Handler
//!
//! Transport binding agnostic TCToken handler: one activation spans the
//! calling task (orchestrator) and exactly one background worker running
//! the binding task. Waiting is cancellable; every failure path terminates
//! in a populated response with a safe redirect, or a non-GUI internal
//! error when no redirect target can be produced at all.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::instrument;

use crate::core::ecard::{ECardResult, minor};
use crate::error::{Error, RedirectMinor, Result, TaskError, TaskFailure};
use crate::channel::TlsConnectionHandler;
use crate::provider::{ConnectionHandle, Provider, SalResponse};
use crate::resource::{RedirectCertificateValidator, ResourceLoader};

use super::context::ActivationContext;
use super::request::TcTokenRequest;
use super::response::{ResultCode, TcTokenResponse};
use super::tasks::{self, BindingTask};

/// Activates the client according to the parameters of the activation URL.
///
/// Creates the per-activation context, retrieves and verifies the TCToken,
/// runs the binding task, and resolves the final refresh address. Failures
/// that recovered a redirect are returned as redirect responses.
///
/// # Errors
///
/// Returns an error only when no safe browser redirect could be produced;
/// the binding layer reports these out-of-band.
#[instrument(level = "debug", skip(provider, parameters))]
pub async fn handle_activate<P: Provider + 'static>(
    provider: P, parameters: &HashMap<String, String>,
) -> Result<TcTokenResponse> {
    let ctx = Arc::new(ActivationContext::new());
    handle_activate_with(provider, ctx, parameters).await
}

/// Like [`handle_activate`], but over a caller-supplied context. Gives the
/// host a handle to interrupt the activation and to observe its state.
///
/// # Errors
///
/// See [`handle_activate`].
pub async fn handle_activate_with<P: Provider + 'static>(
    provider: P, ctx: Arc<ActivationContext>, parameters: &HashMap<String, String>,
) -> Result<TcTokenResponse> {
    let result = activate(&provider, &ctx, parameters).await;
    match result {
        Ok(response) => Ok(response),
        Err(error) => {
            tracing::error!("activation failed: {error}");
            TcTokenResponse::from_error(&error).ok_or(error)
        }
    }
}

async fn activate<P: Provider + 'static>(
    provider: &P, ctx: &Arc<ActivationContext>, parameters: &HashMap<String, String>,
) -> Result<TcTokenResponse> {
    let mut request = TcTokenRequest::fetch(provider, ctx, parameters).await?;
    let result = handle_activate_inner(provider, ctx, &mut request).await;
    request.token_ctx().resource_mut().close_stream();
    result
}

async fn handle_activate_inner<P: Provider + 'static>(
    provider: &P, ctx: &Arc<ActivationContext>, request: &mut TcTokenRequest,
) -> Result<TcTokenResponse> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(doc) = serde_json::to_string(request.token()) {
            tracing::debug!("TCToken: {doc}");
        }
    }

    match process_binding(provider, ctx, request).await {
        Ok(mut response) => {
            // fill in values, so it is usable by the transport module
            determine_refresh_url(provider, ctx, request, &mut response).await?;
            response.finish();
            Ok(response)
        }
        Err(BindingError::Internal(reason)) => Err(Error::Internal { reason }),
        Err(BindingError::Task(failure)) => {
            let mut response = TcTokenResponse::new(request.token());
            let interrupted = matches!(failure.error, TaskError::Interrupted);
            let message = map_task_failure(&failure, &mut response);
            tracing::error!("binding task failed: {message}");

            match determine_refresh_url(provider, ctx, request, &mut response).await {
                Ok(()) => {
                    response.finish();
                }
                Err(Error::SecurityViolation { redirect: Some(url), .. }) => {
                    tracing::error!(
                        "the RefreshAddress contained in the TCToken is invalid, redirecting \
                         to the CommunicationErrorAddress"
                    );
                    response.code = ResultCode::Redirect;
                    response.set_result(ECardResult::error(
                        RedirectMinor::CommunicationError.code(),
                        "the RefreshAddress contained in the TCToken is invalid",
                    ));
                    response.redirect_location = Some(url);
                }
                Err(error) => {
                    if interrupted {
                        response.code = ResultCode::Interrupted;
                        response.set_result(ECardResult::error(
                            RedirectMinor::CancellationByUser.code(),
                            message,
                        ));
                    } else {
                        response.code = ResultCode::InternalError;
                        return Err(error);
                    }
                }
            }
            Ok(response)
        }
    }
}

enum BindingError {
    /// No GUI-visible recovery; reported out-of-band.
    Internal(String),

    /// The binding task failed; mapped through the error table.
    Task(TaskFailure),
}

/// Performs the actual binding procedure: prepares the SAL session,
/// selects the channel, and runs the transport task on a background
/// worker, blocking on it with cancellation support.
async fn process_binding<P: Provider + 'static>(
    provider: &P, ctx: &Arc<ActivationContext>, request: &mut TcTokenRequest,
) -> Result<TcTokenResponse, BindingError> {
    let Some(binding) = request.token().binding() else {
        // the verifier rejects unknown bindings before this point
        return Err(BindingError::Internal("unsupported binding in TCToken".to_string()));
    };
    let task = BindingTask::for_binding(binding);

    let handle = prepare_paos_handle(provider).await.map_err(|failure| {
        if is_user_cancellation(&failure) {
            BindingError::Task(failure)
        } else {
            tracing::error!("failed to connect to card: {failure}");
            BindingError::Internal(format!("failed to connect to card: {failure}"))
        }
    })?;

    prepare_for_task(provider, ctx, request);

    let token = request.token().clone();
    let tls = TlsConnectionHandler::set_up(
        &token,
        request.token_ctx().resource_mut(),
        ctx,
        &handle,
        provider.pkix_disabled(),
    )
    .map_err(|e| BindingError::Task(TaskError::Connection { reason: e.to_string() }.into()))?;

    let worker: JoinHandle<Result<(), TaskFailure>> = tokio::spawn(tasks::run(
        task,
        provider.clone(),
        Arc::clone(ctx),
        token,
        tls,
        handle,
    ));
    wait_for_task(ctx, worker).await.map_err(BindingError::Task)?;

    let mut response = TcTokenResponse::new(request.token());
    response.set_result(ECardResult::ok());
    Ok(response)
}

/// Performs a `CreateSession` to initialize the SAL and returns the
/// connection handle.
async fn prepare_paos_handle<P: Provider>(provider: &P) -> Result<ConnectionHandle, TaskFailure> {
    let SalResponse { result, payload } = provider
        .create_session()
        .await
        .map_err(|e| TaskError::Dispatcher { reason: e.to_string() })?;
    if !result.is_ok() {
        return Err(TaskError::ECard { result }.into());
    }
    Ok(payload)
}

fn is_user_cancellation(failure: &TaskFailure) -> bool {
    match &failure.error {
        TaskError::ECard { result } => {
            result.minor.as_deref() == Some(minor::ifd::CANCELLATION_BY_USER)
        }
        _ => false,
    }
}

/// Records whether TR-03112 checks apply to this activation; the redirect
/// validator reads the flag on every hop.
fn prepare_for_task<P: Provider>(provider: &P, ctx: &ActivationContext, request: &TcTokenRequest) {
    let perform_checks = request.perform_tr03112_checks(provider);
    if !perform_checks {
        tracing::warn!(
            "checks according to BSI TR03112 3.4.2, 3.4.4 (TCToken specific) and 3.4.5 are disabled"
        );
    }
    ctx.set_tr03112_checks(perform_checks);
}

/// Blocks on the worker. Interrupting the activation cancels the worker
/// and converts the wait into a structured interrupted failure instead of
/// propagating a raw cancellation.
async fn wait_for_task(
    ctx: &ActivationContext, mut worker: JoinHandle<Result<(), TaskFailure>>,
) -> Result<(), TaskFailure> {
    tokio::select! {
        joined = &mut worker => match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TaskError::Interrupted.into()),
            Err(e) => Err(TaskError::Other { reason: format!("binding task died: {e}") }.into()),
        },
        () = ctx.interrupted() => {
            tracing::info!("waiting for the binding task has been interrupted, cancelling authentication");
            worker.abort();
            Err(TaskError::Interrupted.into())
        }
    }
}

/// Maps a binding task failure onto the outward result and returns the
/// user-facing message. An explicit additional minor from the PAOS layer
/// overrides the minor derived from the inner cause.
fn map_task_failure(failure: &TaskFailure, response: &mut TcTokenResponse) -> String {
    let message = match &failure.error {
        TaskError::ECard { result } => map_ecard_result(result, response),
        TaskError::Connection { reason } => {
            response.set_result(ECardResult::error(
                RedirectMinor::TrustedChannelEstablishmentFailed.code(),
                reason.clone(),
            ));
            response.set_additional_minor(minor::dp::COMM_ERROR);
            reason.clone()
        }
        TaskError::Interrupted => {
            let message = "the authentication was interrupted".to_string();
            response.code = ResultCode::Interrupted;
            response.set_result(ECardResult::error(
                RedirectMinor::CancellationByUser.code(),
                message.clone(),
            ));
            response.set_additional_minor(minor::app::SESS_TERMINATED);
            message
        }
        TaskError::SchemaValidation { reason } => {
            let message = "schema validation of a server message failed".to_string();
            // it is ridiculous that this should be a client error, but the
            // test specification demands it
            response.set_result(ECardResult::error(RedirectMinor::ClientError.code(), reason.clone()));
            response.set_additional_minor(minor::sal::support::SCHEMA_VALIDATION_FAILED);
            message
        }
        TaskError::Dispatcher { reason } => {
            response.set_result(ECardResult::error(RedirectMinor::ClientError.code(), reason.clone()));
            response.set_additional_minor(minor::app::UNKNOWN_ERROR);
            reason.clone()
        }
        TaskError::Other { reason } => {
            let message = format!("an unhandled inner error occurred:\n{reason}");
            response.set_result(ECardResult::error(RedirectMinor::ClientError.code(), reason.clone()));
            response.set_additional_minor(minor::app::UNKNOWN_ERROR);
            message
        }
    };

    if let Some(additional) = &failure.additional_minor {
        tracing::debug!("replacing minor from inner error with minor from the PAOS layer");
        response.set_additional_minor(additional.clone());
    }

    message
}

/// The error-classification table for eCard results reported by the SAL
/// or the eID server.
fn map_ecard_result(result: &ECardResult, response: &mut TcTokenResponse) -> String {
    let minor_uri = result.minor.as_deref().unwrap_or_default();
    let (redirect_minor, message): (RedirectMinor, &str) = match minor_uri {
        minor::dp::TIMEOUT | minor::sal::CANCELLATION_BY_USER | minor::ifd::CANCELLATION_BY_USER => {
            (RedirectMinor::CancellationByUser, "the authentication was cancelled")
        }
        minor::sal::eac::DOC_VALID_FAILED => {
            (RedirectMinor::ClientError, "verification of the server's authorization certificate failed")
        }
        minor::app::INCORRECT_PARM => {
            (RedirectMinor::ClientError, "the content of a received message is invalid")
        }
        minor::app::INT_ERROR => (RedirectMinor::ServerError, "an internal error occurred"),
        minor::sal::PREREQUISITES_NOT_SATISFIED => {
            (RedirectMinor::ClientError, "the check of the certificate description failed")
        }
        minor::app::UNKNOWN_ERROR => {
            (RedirectMinor::ServerError, "an error occurred during the authentication")
        }
        minor::sal::UNKNOWN_HANDLE => {
            (RedirectMinor::ServerError, "an unknown connection handle was used")
        }
        minor::ifd::INVALID_SLOT_HANDLE => {
            (RedirectMinor::ClientError, "the card was removed during the authentication")
        }
        minor::ifd::PASSWORD_BLOCKED => (RedirectMinor::ClientError, "the PIN is blocked"),
        minor::ifd::PASSWORD_DEACTIVATED => {
            (RedirectMinor::ClientError, "the PIN is deactivated")
        }
        minor::ifd::UNKNOWN_ERROR => {
            (RedirectMinor::ClientError, "an error occurred during the authentication")
        }
        _ => (RedirectMinor::ServerError, "an error occurred during the authentication"),
    };

    response.set_result(ECardResult::error(redirect_minor.code(), message));
    if !minor_uri.is_empty() {
        response.set_additional_minor(minor_uri);
    }
    message.to_string()
}

/// Follows the refresh address one more time through the redirect loader
/// with the TR-03112 validator and rewrites the response's refresh address
/// to the final validated hop. Runs on success and failure alike.
async fn determine_refresh_url<P: Provider>(
    provider: &P, ctx: &ActivationContext, request: &TcTokenRequest,
    response: &mut TcTokenResponse,
) -> Result<()> {
    let Some(endpoint) = response.refresh_address.clone() else {
        return Err(Error::Internal {
            reason: "no refresh address available in the response".to_string(),
        });
    };

    let redirect_checks = request.perform_tr03112_checks(provider);
    let mut validator = RedirectCertificateValidator::new(ctx, redirect_checks);
    let loader = ResourceLoader::new(provider, ctx);

    match loader.load_with_validator(&endpoint, &mut validator).await {
        Ok(mut resource) => {
            resource.close_stream();
            let last = resource.final_url().cloned().ok_or_else(|| Error::Internal {
                reason: "refresh address resolution produced no hops".to_string(),
            })?;
            ctx.mark_refresh_url_valid();
            tracing::debug!("setting redirect address to '{last}'");
            response.refresh_address = Some(last);
            Ok(())
        }
        Err(e) => {
            match request.token().com_error_address_with_params(minor::app::COMMUNICATION_ERROR) {
                Some(url) => Err(Error::SecurityViolation {
                    reason: format!("determination of the refresh address failed: {e}"),
                    redirect: Some(url),
                }),
                None => Err(Error::InvalidRedirect {
                    reason: format!("determination of the refresh address failed: {e}"),
                }),
            }
        }
    }
}
