//! One outbound exchange: acquire, intercept, send, classify, release.

use crate::body::{read_with_timeout, Full, ReadError};
use crate::client::connector::{HttpConnection, HttpConnector};
use crate::client::interceptor::{RequestInterceptor, ResponseErrorHandler};
use crate::config::TimeoutConfig;
use crate::error::{ClientError, Result};
use crate::pool::{wants_close, ConnectionPool, KeepAlivePolicy, Poolable, Pooled, Route};
use bytes::Bytes;
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response, Uri};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timeout policy applied to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Opening a new connection (TCP, TLS and HTTP handshake)
    pub connect: Duration,
    /// Waiting for a pooled connection
    pub acquire: Duration,
    /// Waiting for response headers and for each body chunk
    pub socket: Duration,
}

impl Timeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Timeouts {
            connect: Duration::from_secs(config.connect_seconds),
            acquire: Duration::from_secs(config.acquire_seconds),
            socket: Duration::from_secs(config.socket_seconds),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::from_config(&TimeoutConfig::default())
    }
}

pub struct Pipeline<I, H> {
    pool: ConnectionPool<HttpConnector>,
    timeouts: Timeouts,
    keep_alive: KeepAlivePolicy,
    interceptor: I,
    error_handler: H,
}

impl<I: RequestInterceptor, H: ResponseErrorHandler> Pipeline<I, H> {
    pub fn new(
        pool: ConnectionPool<HttpConnector>,
        timeouts: Timeouts,
        keep_alive: KeepAlivePolicy,
        interceptor: I,
        error_handler: H,
    ) -> Self {
        Pipeline {
            pool,
            timeouts,
            keep_alive,
            interceptor,
            error_handler,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<HttpConnector> {
        &self.pool
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Run one request to completion and return the buffered response.
    /// 4xx responses are reported to the error handler but still returned.
    pub async fn execute(&self, req: Request<Full<Bytes>>) -> Result<Response<Bytes>> {
        let uri = req.uri().clone();
        let route = Route::from_uri(&uri)?;

        let started = Instant::now();
        let mut conn = self.pool.acquire(&route, self.timeouts.acquire).await?;
        let reused = conn.is_reused();
        // Only requests that will actually be sent are intercepted
        self.interceptor.intercept(&req);
        let req = into_origin_form(req, &route)?;

        let response = match self.exchange(&mut conn, req, &route).await {
            Ok(response) => response,
            Err(e) => {
                warn!(route = %route, error = %e, "Upstream exchange failed");
                self.pool.release(conn, false);
                return Err(e);
            }
        };

        let reusable = conn.is_open() && !wants_close(response.headers());
        if reusable {
            conn.set_keep_alive(self.keep_alive.duration_for(response.headers()));
        }
        self.pool.release(conn, reusable);

        debug!(
            route = %route,
            status = response.status().as_u16(),
            reused = reused,
            reusable = reusable,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream response"
        );

        if self.error_handler.has_error(response.status()) {
            self.error_handler.handle_error(&uri, &response);
        }
        Ok(response)
    }

    async fn exchange(
        &self,
        conn: &mut Pooled<HttpConnection>,
        req: Request<Full<Bytes>>,
        route: &Route,
    ) -> Result<Response<Bytes>> {
        let socket = self.timeouts.socket;
        let read_timeout = || ClientError::ReadTimeout {
            route: route.to_string(),
            after: socket,
        };
        let sender = conn.sender_mut();

        tokio::time::timeout(socket, sender.ready())
            .await
            .map_err(|_| read_timeout())??;

        let response = tokio::time::timeout(socket, sender.send_request(req))
            .await
            .map_err(|_| read_timeout())??;

        let (parts, body) = response.into_parts();
        let bytes = read_with_timeout(body, socket).await.map_err(|e| match e {
            ReadError::Timeout => read_timeout(),
            ReadError::Body(e) => ClientError::from(e),
        })?;
        Ok(Response::from_parts(parts, bytes))
    }
}

/// Rewrite an absolute-form request to origin-form with a Host header.
fn into_origin_form(req: Request<Full<Bytes>>, route: &Route) -> Result<Request<Full<Bytes>>> {
    let (mut parts, body) = req.into_parts();
    parts.uri = match parts.uri.path_and_query() {
        Some(pq) => Uri::from(pq.clone()),
        None => Uri::from_static("/"),
    };
    if !parts.headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&route.authority())
            .map_err(|e| ClientError::InvalidUri(e.to_string()))?;
        parts.headers.insert(HOST, host);
    }
    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Scheme;

    fn request(uri: &str) -> Request<Full<Bytes>> {
        Request::builder().uri(uri).body(Full::empty()).unwrap()
    }

    #[test]
    fn test_origin_form_keeps_path_and_query() {
        let route = Route::new(Scheme::Http, "example.com", 8080);
        let req = into_origin_form(request("http://example.com:8080/api/random?x=1"), &route).unwrap();
        assert_eq!(req.uri(), "/api/random?x=1");
        assert_eq!(req.headers().get(HOST).unwrap(), "example.com:8080");
    }

    #[test]
    fn test_origin_form_default_port_and_root() {
        let route = Route::new(Scheme::Https, "example.com", 443);
        let req = into_origin_form(request("https://example.com"), &route).unwrap();
        assert_eq!(req.uri().path(), "/");
        assert_eq!(req.headers().get(HOST).unwrap(), "example.com");
    }

    #[test]
    fn test_origin_form_brackets_ipv6_host() {
        let uri: Uri = "http://[::1]:8080/api".parse().unwrap();
        let route = Route::from_uri(&uri).unwrap();
        let req = into_origin_form(request("http://[::1]:8080/api"), &route).unwrap();
        assert_eq!(req.uri(), "/api");
        assert_eq!(req.headers().get(HOST).unwrap(), "[::1]:8080");
    }

    #[test]
    fn test_origin_form_preserves_explicit_host() {
        let route = Route::new(Scheme::Http, "10.0.0.1", 80);
        let mut req = request("http://10.0.0.1/");
        req.headers_mut()
            .insert(HOST, HeaderValue::from_static("quotes.internal"));
        let req = into_origin_form(req, &route).unwrap();
        assert_eq!(req.headers().get(HOST).unwrap(), "quotes.internal");
    }

    #[test]
    fn test_timeouts_from_config() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(30));
        assert_eq!(timeouts.acquire, Duration::from_secs(30));
        assert_eq!(timeouts.socket, Duration::from_secs(60));
    }
}
