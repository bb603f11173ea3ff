//! HTTP/1 server for the quote endpoint.

mod handler;

pub use handler::{handle_request, Quote, QuoteService, QuoteValue};

use crate::client::{RequestInterceptor, ResponseErrorHandler};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::error;

/// Slow clients get this long to send request headers
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Serve one inbound connection until the client goes away
pub async fn serve_connection<I, H>(
    stream: TcpStream,
    client_addr: SocketAddr,
    service: Arc<QuoteService<I, H>>,
) -> Result<(), hyper::Error>
where
    I: RequestInterceptor,
    H: ResponseErrorHandler,
{
    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new());
    builder.header_read_timeout(HEADER_READ_TIMEOUT);

    builder
        .serve_connection(
            TokioIo::new(stream),
            service_fn(move |req| handle_request(req, client_addr, Arc::clone(&service))),
        )
        .await
}

/// Accept loop: one task per connection. Returns only if accepting fails.
pub async fn serve<I, H>(listener: TcpListener, service: Arc<QuoteService<I, H>>) -> std::io::Result<()>
where
    I: RequestInterceptor,
    H: ResponseErrorHandler,
{
    loop {
        let (stream, client_addr) = listener.accept().await?;
        let service = Arc::clone(&service);

        tokio::task::spawn(async move {
            if let Err(err) = serve_connection(stream, client_addr, service).await {
                error!(client = %client_addr, error = ?err, "Error serving client");
            }
        });
    }
}
