//! # Same-Origin Policy
//!
//! Origin equality as required by TR-03112-7: scheme and host compared
//! case-insensitively, ports compared after substituting the scheme's
//! default port when absent. Used to prevent redirect-based hijacking.

use url::Url;

/// Checks whether two URLs share the same origin.
///
/// The comparison is symmetric: scheme (case-insensitive), host
/// (case-insensitive), and resolved port (the scheme's default port is
/// substituted when none is given) must all match.
#[must_use]
pub fn check_same_origin(a: &Url, b: &Url) -> bool {
    if !a.scheme().eq_ignore_ascii_case(b.scheme()) {
        return false;
    }
    let (Some(host_a), Some(host_b)) = (a.host_str(), b.host_str()) else {
        return false;
    };
    if !host_a.eq_ignore_ascii_case(host_b) {
        return false;
    }
    a.port_or_known_default() == b.port_or_known_default()
}

/// Whether the HTTP status code denotes a redirect the activation core is
/// willing to follow (302, 303 or 307).
#[must_use]
pub const fn is_redirect_status(status: u16) -> bool {
    matches!(status, 302 | 303 | 307)
}
