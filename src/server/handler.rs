//! `GET /quote`: fetch a random quote upstream and return its `value`.

use crate::body::Full;
use crate::client::{ClientErrorHandler, HttpClient, JsonReply, LoggingInterceptor};
use crate::client::{RequestInterceptor, ResponseErrorHandler};
use crate::error::ClientError;
use crate::helpers::{error_response, json_response};
use bytes::Bytes;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

/// Upstream payload: `{"type": "success", "value": {"id": 1, "quote": "..."}}`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Quote {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: QuoteValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuoteValue {
    pub id: i64,
    pub quote: String,
}

/// State shared by every connection the endpoint serves
pub struct QuoteService<I = LoggingInterceptor, H = ClientErrorHandler> {
    client: Arc<HttpClient<I, H>>,
    upstream_url: String,
}

impl<I: RequestInterceptor, H: ResponseErrorHandler> QuoteService<I, H> {
    pub fn new(client: Arc<HttpClient<I, H>>, upstream_url: impl Into<String>) -> Self {
        QuoteService {
            client,
            upstream_url: upstream_url.into(),
        }
    }

    pub fn client(&self) -> &HttpClient<I, H> {
        &self.client
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    async fn quote(&self) -> Response<Full<Bytes>> {
        match self.client.get_json::<Quote>(&self.upstream_url).await {
            Ok(JsonReply::Parsed { body, .. }) => match serde_json::to_vec(&body.value) {
                Ok(json) => json_response(StatusCode::OK, Bytes::from(json)),
                Err(e) => {
                    error!(error = %e, "Failed to encode quote");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            },
            Ok(JsonReply::Status(upstream)) => pass_through(upstream),
            Err(e) => failure_response(&e, &self.upstream_url),
        }
    }
}

/// Route one inbound request
pub async fn handle_request<B, I, H>(
    req: Request<B>,
    client_addr: SocketAddr,
    service: Arc<QuoteService<I, H>>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    I: RequestInterceptor,
    H: ResponseErrorHandler,
{
    debug!(client = %client_addr, method = %req.method(), path = %req.uri().path(), "Inbound request");

    if req.uri().path() != "/quote" {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not Found"));
    }
    if req.method() != Method::GET {
        let mut resp = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        resp.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
        return Ok(resp);
    }
    Ok(service.quote().await)
}

/// Relay a non-2xx upstream response: same status, same body, same content type.
fn pass_through(upstream: Response<Bytes>) -> Response<Full<Bytes>> {
    let (parts, body) = upstream.into_parts();
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = parts.status;
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        resp.headers_mut().insert(CONTENT_TYPE, content_type.clone());
    }
    resp
}

fn failure_response(err: &ClientError, upstream: &str) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    error!(upstream = %upstream, status = status.as_u16(), error = %err, "Quote request failed");
    error_response(status, status.canonical_reason().unwrap_or("Upstream Error"))
}
