//! Keep-alive duration negotiation from `Keep-Alive` response headers.

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use std::time::Duration;

/// `Keep-Alive` is not among hyper's predefined header constants
pub const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Decides how long an idle connection may be retained after a response.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlivePolicy {
    default: Duration,
}

impl KeepAlivePolicy {
    pub fn new(default: Duration) -> Self {
        KeepAlivePolicy { default }
    }

    pub fn default_duration(&self) -> Duration {
        self.default
    }

    /// Keep-alive duration advertised by the response, or the default.
    pub fn duration_for(&self, headers: &HeaderMap) -> Duration {
        headers
            .get_all(KEEP_ALIVE)
            .iter()
            .find_map(timeout_param)
            .unwrap_or(self.default)
    }
}

impl Default for KeepAlivePolicy {
    fn default() -> Self {
        KeepAlivePolicy::new(Duration::from_secs(20))
    }
}

/// Find `timeout=<seconds>` in a header value such as `timeout=15, max=100`.
/// Anything malformed yields `None`.
fn timeout_param(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?;
    value
        .split([',', ';'])
        .filter_map(|element| element.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("timeout"))
        .and_then(|(_, secs)| secs.trim().trim_matches('"').parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// True when the response asks for the connection to be closed.
pub fn wants_close(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|token| token.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    })
}
