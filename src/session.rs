//! Session bootstrap — named cookies and pre-extraction navigation.
//!
//! Bootstrap is a precondition for the authenticated pipelines, not engine
//! logic: cookies are injected, the page is navigated, and only then does
//! extraction begin. The cookie shape mirrors what hosts hand over:
//! `{value, domain, path, expires}` keyed by cookie name, where `expires` is
//! either an ISO instant or the literal `"Session"`.

use crate::error::GleanerResult;
use crate::view::ViewTree;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Sentinel `expires` value for session-scoped cookies.
pub const SESSION_EXPIRY: &str = "Session";

/// One named session cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cookie {
    pub value: String,
    pub domain: String,
    pub path: String,
    /// ISO-8601 instant, or `"Session"` for a session-scoped cookie.
    pub expires: String,
}

impl Cookie {
    /// Expiry as seconds since the epoch, `None` for session cookies or
    /// unparseable instants.
    pub fn expires_epoch(&self) -> Option<f64> {
        if self.expires == SESSION_EXPIRY {
            return None;
        }
        DateTime::parse_from_rfc3339(&self.expires)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
    }
}

/// Cookies keyed by name, in a stable order.
pub type CookieJar = BTreeMap<String, Cookie>;

/// Inject `jar` into the backend and navigate to `url`.
///
/// Callers run this once per unit of work before any extraction; pipelines
/// themselves assume a signed-in, rendered page.
pub async fn bootstrap(
    tree: &dyn ViewTree,
    jar: &CookieJar,
    url: &str,
    timeout: Duration,
) -> GleanerResult<()> {
    if !jar.is_empty() {
        tree.set_cookies(jar).await?;
    }
    tree.navigate(url, timeout).await
}

/// Parse a cookie jar from its JSON form. `None` when any cookie entry does
/// not match the closed `{value, domain, path, expires}` shape.
pub fn jar_from_json(value: serde_json::Value) -> Option<CookieJar> {
    serde_json::from_value(value).ok()
}
