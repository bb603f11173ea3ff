//! Helper functions for TLS, responses, and TCP settings.

use crate::body::Full;
use crate::config::TcpKeepaliveConfig;
use crate::error::{ClientError, Result};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Create a TLS connector trusting the webpki root certificates
pub fn create_tls_connector() -> Result<TlsConnector> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Apply TCP keep-alive settings to a socket
pub fn apply_tcp_keepalive(stream: &TcpStream, config: &TcpKeepaliveConfig) -> std::io::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let socket = SockRef::from(stream);

    #[allow(unused_mut)]
    let mut keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(config.time_seconds))
        .with_interval(Duration::from_secs(config.interval_seconds));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        keepalive = keepalive.with_retries(config.retries);
    }

    socket.set_tcp_keepalive(&keepalive)
}

/// Plain-text response with the given status
pub fn error_response(status: StatusCode, msg: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(msg.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

/// JSON response with an already-serialized body
pub fn json_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
