//! Pooled outbound HTTP client.
//!
//! `HttpClient` wires the pieces together: a TLS-capable connector, the
//! bounded connection pool, the request pipeline and the idle reaper.

pub mod connector;
pub mod interceptor;
pub mod pipeline;

pub use connector::{HttpConnection, HttpConnector};
pub use interceptor::{ClientErrorHandler, LoggingInterceptor, RequestInterceptor, ResponseErrorHandler};
pub use pipeline::{Pipeline, Timeouts};

use crate::body::Full;
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::helpers::create_tls_connector;
use crate::pool::{ConnectionPool, IdleReaper, KeepAlivePolicy, PoolLimits};
use bytes::Bytes;
use hyper::header::{HeaderValue, ACCEPT};
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// Result of a JSON GET
#[derive(Debug)]
pub enum JsonReply<T> {
    /// 2xx with a body that decoded into `T`
    Parsed { status: StatusCode, body: T },
    /// Any other status, untouched
    Status(Response<Bytes>),
}

pub struct HttpClient<I = LoggingInterceptor, H = ClientErrorHandler> {
    pipeline: Pipeline<I, H>,
    reaper: Mutex<IdleReaper>,
}

impl HttpClient {
    /// Client with request logging and 4xx classification
    pub fn new(config: &Config) -> Result<Self> {
        let interceptor = LoggingInterceptor::new(Arc::new(config.logging.clone()));
        HttpClient::with_capabilities(config, interceptor, ClientErrorHandler)
    }
}

impl<I: RequestInterceptor, H: ResponseErrorHandler> HttpClient<I, H> {
    /// Build the pool and pipeline and start the reaper.
    pub fn with_capabilities(config: &Config, interceptor: I, error_handler: H) -> Result<Self> {
        let limits = PoolLimits::from_config(&config.connection_pool)?;
        let timeouts = Timeouts::from_config(&config.timeouts);
        let keep_alive = KeepAlivePolicy::new(config.keep_alive.default_duration());

        let connector = HttpConnector::new(
            create_tls_connector()?,
            timeouts.connect,
            config.tcp_keepalive.clone(),
        );
        let pool = ConnectionPool::new(limits, connector)?;
        let reaper = IdleReaper::start(
            &pool,
            Duration::from_secs(config.reaper.interval_seconds),
            Duration::from_secs(config.reaper.max_idle_seconds),
        )?;

        info!(
            max_per_route = config.connection_pool.max_per_route,
            max_total = config.connection_pool.max_total,
            overrides = config.connection_pool.route_overrides.len(),
            "HTTP client ready"
        );

        Ok(HttpClient {
            pipeline: Pipeline::new(pool, timeouts, keep_alive, interceptor, error_handler),
            reaper: Mutex::new(reaper),
        })
    }

    pub async fn execute(&self, req: Request<Full<Bytes>>) -> Result<Response<Bytes>> {
        self.pipeline.execute(req).await
    }

    pub async fn get(&self, uri: &str) -> Result<Response<Bytes>> {
        let req = get_request(uri, None)?;
        self.execute(req).await
    }

    /// GET `uri` and decode a 2xx body as JSON. Other statuses come back as-is.
    pub async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> Result<JsonReply<T>> {
        let req = get_request(uri, Some(HeaderValue::from_static("application/json")))?;
        let response = self.execute(req).await?;
        if !response.status().is_success() {
            return Ok(JsonReply::Status(response));
        }
        let body = serde_json::from_slice(response.body())
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(JsonReply::Parsed {
            status: response.status(),
            body,
        })
    }

    pub fn pool(&self) -> &ConnectionPool<HttpConnector> {
        self.pipeline.pool()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.pipeline.timeouts()
    }

    /// Stop the reaper and close the pool. In-flight requests finish;
    /// later ones fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        let closed = self.pool().shutdown();
        info!(closed_idle = closed, "HTTP client shut down");
    }
}

fn get_request(uri: &str, accept: Option<HeaderValue>) -> Result<Request<Full<Bytes>>> {
    let uri: Uri = uri
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ClientError::InvalidUri(e.to_string()))?;
    let mut req = Request::new(Full::empty());
    *req.method_mut() = Method::GET;
    *req.uri_mut() = uri;
    if let Some(accept) = accept {
        req.headers_mut().insert(ACCEPT, accept);
    }
    Ok(req)
}
