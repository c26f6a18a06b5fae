//! # Cookie Jar
//!
//! Minimal cookie store scoped to one activation. Cookies are kept per
//! origin, honor `Max-Age`, and are discarded with the activation context.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use url::Url;

#[derive(Clone, Debug)]
struct Cookie {
    name: String,
    value: String,
    expires: Option<DateTime<Utc>>,
}

/// Per-activation cookie store.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    cookies: HashMap<String, Vec<Cookie>>,
}

fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host.to_ascii_lowercase(), port))
}

impl CookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a cookie from a `Set-Cookie` header value. Unparsable
    /// headers are ignored with a warning; the remote end must not be able
    /// to break the activation through a bad cookie.
    pub fn store(&mut self, url: &Url, header_value: &str) {
        let Some(key) = origin_key(url) else {
            return;
        };
        let mut parts = header_value.split(';');
        let Some(pair) = parts.next() else {
            return;
        };
        let Some((name, value)) = pair.split_once('=') else {
            tracing::warn!("received invalid cookie from {url}, the cookie is not stored");
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            tracing::warn!("received invalid cookie from {url}, the cookie is not stored");
            return;
        }

        let mut expires = None;
        for attr in parts {
            if let Some((k, v)) = attr.split_once('=') {
                if k.trim().eq_ignore_ascii_case("Max-Age") {
                    if let Ok(secs) = v.trim().parse::<i64>() {
                        expires = Some(Utc::now() + Duration::seconds(secs));
                    }
                }
            }
        }

        let list = self.cookies.entry(key).or_default();
        list.retain(|c| c.name != name);
        list.push(Cookie { name: name.to_string(), value: value.trim().to_string(), expires });
    }

    /// The `Cookie` header value for a request to `url`, or `None` when no
    /// live cookies exist for its origin. Expired cookies are pruned.
    pub fn header_for(&mut self, url: &Url) -> Option<String> {
        let key = origin_key(url)?;
        let now = Utc::now();
        let list = self.cookies.get_mut(&key)?;
        list.retain(|c| c.expires.is_none_or(|t| t > now));
        if list.is_empty() {
            return None;
        }
        Some(
            list.iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
