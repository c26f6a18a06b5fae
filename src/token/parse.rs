//! # TCToken Parser
//!
//! Lenient decoder for TCToken documents. Two textual repairs for known
//! provider bugs are applied before parsing, element names are matched
//! case-insensitively, and a malformed PSK is flagged on the token instead
//! of failing the parse so verification can produce a proper redirect.

use crate::error::{Error, Result};
use crate::token::types::{PathSecurityParameters, TcToken};

/// Hard cap on the token document size. Anything larger is rejected before
/// the XML parser sees it.
pub const MAX_TOKEN_SIZE: usize = 1024 * 1024;

/// Rewrites the misspelled singular element name `PathSecurity-Parameter`
/// to the correct plural form, unless the plural form is already present.
/// Applying the fix twice is a no-op.
#[must_use]
pub fn fix_path_security_parameters(input: &str) -> String {
    if input.contains("PathSecurity-Parameters") {
        return input.to_string();
    }
    input.replace("PathSecurity-Parameter", "PathSecurity-Parameters")
}

/// Un-escapes HTML-entity-escaped `<PSK>` tags some providers emit.
#[must_use]
pub fn undo_psk_escaping(input: &str) -> String {
    input.replace("&lt;PSK&gt;", "<PSK>").replace("&lt;/PSK&gt;", "</PSK>")
}

/// Ensures the server address carries an `http(s)` scheme: a bare `//` is
/// completed to `https://`, anything without a scheme gets `https://`
/// prepended.
fn fix_server_scheme(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if let Some(rest) = address.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{address}")
    }
}

/// Parses zero or more TCTokens out of an XML document.
///
/// # Errors
///
/// Returns [`Error::InvalidTcToken`] when the document exceeds the size
/// limit, is not well-formed XML, or contains no `TCTokenType` element.
pub fn parse_tc_tokens(input: &str) -> Result<Vec<TcToken>> {
    if input.len() > MAX_TOKEN_SIZE {
        return Err(Error::InvalidTcToken {
            reason: format!("document exceeds the size limit of {MAX_TOKEN_SIZE} bytes"),
        });
    }

    let repaired = fix_path_security_parameters(&undo_psk_escaping(input));
    let document = roxmltree::Document::parse(&repaired)
        .map_err(|e| Error::InvalidTcToken { reason: format!("malformed XML: {e}") })?;

    let tokens: Vec<TcToken> = document
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name().eq_ignore_ascii_case("TCTokenType"))
        .map(|node| parse_token(node))
        .collect();

    if tokens.is_empty() {
        return Err(Error::InvalidTcToken {
            reason: "no TCToken element found in the document".to_string(),
        });
    }
    Ok(tokens)
}

fn parse_token(node: roxmltree::Node<'_, '_>) -> TcToken {
    let mut token = TcToken::default();

    for child in node.children().filter(roxmltree::Node::is_element) {
        let name = child.tag_name().name();
        let text = child.text().map(str::trim).unwrap_or_default();

        if name.eq_ignore_ascii_case("ServerAddress") {
            if !text.is_empty() {
                token.server_address = fix_server_scheme(text);
            }
        } else if name.eq_ignore_ascii_case("SessionIdentifier") {
            token.session_identifier = text.to_string();
        } else if name.eq_ignore_ascii_case("RefreshAddress") {
            token.refresh_address = text.to_string();
        } else if name.eq_ignore_ascii_case("CommunicationErrorAddress") {
            token.communication_error_address = text.to_string();
        } else if name.eq_ignore_ascii_case("Binding") {
            token.binding = text.to_string();
        } else if name.eq_ignore_ascii_case("PathSecurity-Protocol") {
            token.path_security_protocol = text.to_string();
        } else if name.eq_ignore_ascii_case("PathSecurity-Parameters") {
            parse_path_security_parameters(&child, &mut token);
        } else if name.eq_ignore_ascii_case("AllowedCardType") {
            if !text.is_empty() {
                token.allowed_card_types.push(text.to_string());
            }
        } else {
            tracing::debug!("ignoring unknown TCToken element `{name}`");
        }
    }

    token
}

/// Decodes the PSK hex string inside `PathSecurity-Parameters`. An odd
/// number of digits or non-hex content marks the token's PSK as invalid
/// instead of failing the parse; parameters without a usable PSK value are
/// discarded entirely, which forces the attached-eID-server fallback.
fn parse_path_security_parameters(node: &roxmltree::Node<'_, '_>, token: &mut TcToken) {
    let psk_text = node
        .children()
        .filter(roxmltree::Node::is_element)
        .find(|c| c.tag_name().name().eq_ignore_ascii_case("PSK"))
        .and_then(|c| c.text())
        .map(str::trim)
        .unwrap_or_default();

    if psk_text.is_empty() {
        token.path_security_parameters = None;
        return;
    }

    match hex::decode(psk_text) {
        Ok(psk) if !psk.is_empty() => {
            token.path_security_parameters = Some(PathSecurityParameters { psk });
        }
        Ok(_) => {
            token.path_security_parameters = None;
        }
        Err(_) => {
            tracing::warn!("TCToken contains a PSK that is not a valid hex string");
            token.invalid_psk = true;
            token.path_security_parameters = None;
        }
    }
}
