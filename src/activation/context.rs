//! # Activation Context
//!
//! Per-activation state, created at the start of an activation and owned by
//! exactly one browser-activation lifecycle. There is no process-global
//! store: concurrent activations cannot alias each other's state. Interior
//! mutability keeps the context shareable between the orchestrator and its
//! single background worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use rustls_pki_types::CertificateDer;
use tokio::sync::Notify;
use url::Url;

use crate::resource::{CertificateDescription, CookieJar};

/// State scoped to one activation.
#[derive(Debug, Default)]
pub struct ActivationContext {
    tr03112_checks: AtomicBool,
    same_channel: AtomicBool,
    refresh_url_valid: AtomicBool,
    token_url: OnceLock<Url>,
    eservice_description: OnceLock<CertificateDescription>,
    eservice_certificate: Mutex<Option<CertificateDer<'static>>>,
    cookies: Mutex<CookieJar>,
    card_type: Mutex<Option<String>>,
    user_cancellation: Mutex<Option<String>>,
    interrupt: Notify,
}

impl ActivationContext {
    /// Creates the context for a new activation. TR-03112 checks start
    /// enabled and are re-evaluated once the token's binding is known.
    #[must_use]
    pub fn new() -> Self {
        Self { tr03112_checks: AtomicBool::new(true), ..Self::default() }
    }

    /// Records whether TR-03112 checks are performed for this activation.
    pub fn set_tr03112_checks(&self, enabled: bool) {
        self.tr03112_checks.store(enabled, Ordering::SeqCst);
    }

    /// Whether TR-03112 checks are performed for this activation.
    #[must_use]
    pub fn tr03112_checks(&self) -> bool {
        self.tr03112_checks.load(Ordering::SeqCst)
    }

    /// Records the originally requested TCToken URL. Only the first call
    /// takes effect; the URL is fixed for the activation's lifetime.
    pub fn set_token_url(&self, url: Url) {
        let _ = self.token_url.set(url);
    }

    /// The originally requested TCToken URL.
    #[must_use]
    pub fn token_url(&self) -> Option<Url> {
        self.token_url.get().cloned()
    }

    /// Fulfills the eService certificate description promise. Later calls
    /// are ignored; the description is immutable once produced.
    pub fn provide_eservice_description(&self, description: CertificateDescription) {
        let _ = self.eservice_description.set(description);
    }

    /// Non-blocking peek at the eService certificate description.
    #[must_use]
    pub fn eservice_description(&self) -> Option<CertificateDescription> {
        self.eservice_description.get().cloned()
    }

    /// Records that the PAOS channel reuses the token-retrieval channel.
    pub fn set_same_channel(&self, same: bool) {
        self.same_channel.store(same, Ordering::SeqCst);
    }

    /// Whether the PAOS channel reuses the token-retrieval channel.
    #[must_use]
    pub fn is_same_channel(&self) -> bool {
        self.same_channel.load(Ordering::SeqCst)
    }

    /// Marks the refresh URL as validated.
    pub fn mark_refresh_url_valid(&self) {
        self.refresh_url_valid.store(true, Ordering::SeqCst);
    }

    /// Whether the refresh URL passed redirect validation.
    #[must_use]
    pub fn is_refresh_url_valid(&self) -> bool {
        self.refresh_url_valid.load(Ordering::SeqCst)
    }

    /// Stores the eService certificate observed on the secured channel.
    pub fn record_eservice_certificate(&self, certificate: CertificateDer<'static>) {
        *self.eservice_certificate.lock().expect("certificate lock poisoned") = Some(certificate);
    }

    /// The eService certificate observed on the secured channel.
    #[must_use]
    pub fn eservice_certificate(&self) -> Option<CertificateDer<'static>> {
        self.eservice_certificate.lock().expect("certificate lock poisoned").clone()
    }

    /// The `Cookie` header value for `url`, when the jar has live cookies.
    #[must_use]
    pub fn cookie_header_for(&self, url: &Url) -> Option<String> {
        self.cookies.lock().expect("cookie lock poisoned").header_for(url)
    }

    /// Stores a `Set-Cookie` header received from `url`.
    pub fn store_cookie(&self, url: &Url, header_value: &str) {
        self.cookies.lock().expect("cookie lock poisoned").store(url, header_value);
    }

    /// Sets the requested card type.
    pub fn set_card_type(&self, card_type: impl Into<String>) {
        *self.card_type.lock().expect("card type lock poisoned") = Some(card_type.into());
    }

    /// The requested card type, when one was set.
    #[must_use]
    pub fn card_type(&self) -> Option<String> {
        self.card_type.lock().expect("card type lock poisoned").clone()
    }

    /// Records that the user cancelled the card selection dialog. The
    /// verifier routes this through the refresh-address recovery path.
    pub fn cancel_card_selection(&self, message: impl Into<String>) {
        *self.user_cancellation.lock().expect("cancellation lock poisoned") = Some(message.into());
    }

    /// The pending user cancellation, when one was recorded.
    #[must_use]
    pub fn user_cancellation(&self) -> Option<String> {
        self.user_cancellation.lock().expect("cancellation lock poisoned").clone()
    }

    /// Interrupts the activation: the orchestrator cancels the binding
    /// task and reports a structured interrupted failure.
    pub fn interrupt(&self) {
        self.interrupt.notify_one();
    }

    /// Resolves when [`interrupt`](Self::interrupt) is called.
    pub async fn interrupted(&self) {
        self.interrupt.notified().await;
    }
}
