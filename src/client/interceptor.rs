//! Pluggable request interception and response error classification.

use crate::config::LoggingConfig;
use crate::error::ClientError;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Sees every outbound request before it is sent. Read-only.
pub trait RequestInterceptor: Send + Sync + 'static {
    fn intercept<B>(&self, req: &Request<B>);
}

/// Decides which responses count as errors and reacts to them.
/// Never changes the response handed back to the caller.
pub trait ResponseErrorHandler: Send + Sync + 'static {
    fn has_error(&self, status: StatusCode) -> bool;

    fn handle_error(&self, uri: &Uri, response: &Response<Bytes>);
}

/// Logs method, URI and headers of each request, redacting sensitive values.
pub struct LoggingInterceptor {
    logging: Arc<LoggingConfig>,
}

impl LoggingInterceptor {
    pub fn new(logging: Arc<LoggingConfig>) -> Self {
        LoggingInterceptor { logging }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        LoggingInterceptor::new(Arc::new(LoggingConfig::default()))
    }
}

impl RequestInterceptor for LoggingInterceptor {
    fn intercept<B>(&self, req: &Request<B>) {
        if !self.logging.log_requests {
            return;
        }
        info!(method = %req.method(), uri = %req.uri(), "Outbound request");
        log_headers_sanitized(req.headers().iter(), &self.logging);
    }
}

/// Treats 4xx responses as errors and logs them. 5xx responses are passed
/// through silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientErrorHandler;

impl ResponseErrorHandler for ClientErrorHandler {
    fn has_error(&self, status: StatusCode) -> bool {
        status.is_client_error()
    }

    fn handle_error(&self, uri: &Uri, response: &Response<Bytes>) {
        let err = ClientError::UpstreamClientError {
            status: response.status().as_u16(),
            uri: uri.to_string(),
        };
        error!(
            status = response.status().as_u16(),
            uri = %uri,
            body_len = response.body().len(),
            "{}",
            err
        );
    }
}

/// Redact a header value for logging if the header is configured as sensitive.
/// The auth scheme stays visible.
pub fn sanitize_header_value(name: &str, value: &str, logging: &LoggingConfig) -> String {
    if !logging.redact_sensitive_headers {
        return value.to_string();
    }

    let is_sensitive = logging
        .sensitive_headers
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name));
    if !is_sensitive {
        return value.to_string();
    }

    let scheme = value.split_once(' ').map(|(scheme, _)| scheme);
    match scheme {
        Some(s) if ["bearer", "basic", "digest"].iter().any(|k| s.eq_ignore_ascii_case(k)) => {
            format!("{} [REDACTED]", s)
        }
        _ => "[REDACTED]".to_string(),
    }
}

/// Log headers with sensitive data redacted
pub fn log_headers_sanitized<'a, I>(headers: I, logging: &LoggingConfig)
where
    I: Iterator<Item = (&'a HeaderName, &'a HeaderValue)>,
{
    for (name, value) in headers {
        let value_str = value.to_str().unwrap_or("[binary]");
        let safe_value = sanitize_header_value(name.as_str(), value_str, logging);
        debug!(header = %name, value = %safe_value, "HTTP header");
    }
}
