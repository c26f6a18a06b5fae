//! # Activation
//!
//! The activation orchestrator: obtains and verifies the TCToken, selects
//! the secured channel, dispatches the binding task on a background worker,
//! maps failures into a structured response, and determines the refresh
//! address handed back to the browser.

pub mod context;
pub mod handler;
pub mod request;
pub mod response;
pub mod tasks;

pub use context::ActivationContext;
pub use handler::{handle_activate, handle_activate_with};
pub use request::TcTokenRequest;
pub use response::{ResultCode, TcTokenResponse};
pub use tasks::BindingTask;
