//! # eID Activation Core
//!
//! The activation core of an eID client implementing
//! [BSI TR-03112](https://www.bsi.bund.de/EN/Themen/Unternehmen-und-Organisationen/Standards-und-Zertifizierung/Technische-Richtlinien/TR-nach-Thema-sortiert/tr03112/TR-03112_node.html)
//! and TR-03124: given a browser-supplied activation URL, it retrieves the
//! short-lived TCToken document, validates it against the TR-03112 rule
//! set, establishes a secured channel to the eID server (same TLS channel,
//! PSK-bound channel, or mutually authenticated TLS), drives the
//! authentication exchange over that channel, and determines a safe
//! refresh address to redirect the browser back to. Every step defends
//! against redirect-based same-origin violations and certificate
//! substitution.
//!
//! All I/O crosses the [`provider`] seam: implementers supply the HTTP and
//! TLS transports, the SAL dispatcher for the smartcard stack, and the
//! PAOS exchange. The core contains the protocol logic only.

pub mod activation;
pub mod channel;
pub mod core;
pub mod error;
pub mod provider;
pub mod resource;
pub mod token;

pub use activation::{ActivationContext, ResultCode, TcTokenResponse, handle_activate};
pub use error::{Error, Result};
pub use token::TcToken;
