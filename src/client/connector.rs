//! TCP/TLS transport that opens HTTP/1.1 connections for the pool.

use crate::body::Full;
use crate::config::TcpKeepaliveConfig;
use crate::error::{ClientError, Result};
use crate::helpers::apply_tcp_keepalive;
use crate::pool::{Connect, Poolable, Route};
use bytes::Bytes;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, warn};

/// An HTTP/1.1 connection. The protocol driver runs on its own task.
pub struct HttpConnection {
    sender: SendRequest<Full<Bytes>>,
}

impl HttpConnection {
    pub fn sender_mut(&mut self) -> &mut SendRequest<Full<Bytes>> {
        &mut self.sender
    }
}

impl Poolable for HttpConnection {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Opens plain or TLS connections, bounded by the connect timeout.
pub struct HttpConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
    tcp_keepalive: TcpKeepaliveConfig,
}

impl HttpConnector {
    pub fn new(tls: TlsConnector, connect_timeout: Duration, tcp_keepalive: TcpKeepaliveConfig) -> Self {
        HttpConnector {
            tls,
            connect_timeout,
            tcp_keepalive,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    async fn open(&self, route: &Route) -> Result<HttpConnection> {
        let tcp_stream = TcpStream::connect((route.host(), route.port()))
            .await
            .map_err(|e| {
                error!(route = %route, error = %e, "Failed to connect to target");
                ClientError::Connect {
                    route: route.to_string(),
                    source: e,
                }
            })?;

        if let Err(e) = apply_tcp_keepalive(&tcp_stream, &self.tcp_keepalive) {
            warn!(route = %route, error = %e, "Failed to set TCP keep-alive");
        }

        if route.scheme().is_tls() {
            let server_name: ServerName<'static> = route
                .host()
                .to_string()
                .try_into()
                .map_err(|_| ClientError::Tls(format!("invalid server name {}", route.host())))?;

            let tls_stream = self
                .tls
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| {
                    error!(route = %route, error = %e, "TLS connection failed");
                    ClientError::Tls(e.to_string())
                })?;
            handshake(tls_stream, route).await
        } else {
            handshake(tcp_stream, route).await
        }
    }
}

impl Connect for HttpConnector {
    type Connection = HttpConnection;

    async fn connect(&self, route: &Route) -> Result<HttpConnection> {
        match tokio::time::timeout(self.connect_timeout, self.open(route)).await {
            Ok(result) => result,
            Err(_) => {
                error!(route = %route, "Connection timeout");
                Err(ClientError::ConnectTimeout {
                    route: route.to_string(),
                    after: self.connect_timeout,
                })
            }
        }
    }
}

async fn handshake<T>(stream: T, route: &Route) -> Result<HttpConnection>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await.map_err(|e| {
        error!(route = %route, error = %e, "HTTP handshake failed");
        ClientError::from(e)
    })?;

    let route_label = route.to_string();
    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            debug!(route = %route_label, error = ?err, "Connection driver error");
        }
    });

    Ok(HttpConnection { sender })
}
