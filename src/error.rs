//! Structured error types for the pooled client.

use std::fmt;
use std::io;
use std::time::Duration;

/// Main error type for pool, transport and pipeline operations
#[derive(Debug)]
pub enum ClientError {
    /// No connection became available within the acquire timeout
    PoolExhausted { route: String, waited: Duration },
    /// A route (or the whole pool) is configured with a non-positive cap
    RouteRejected(String),
    /// The pool has been shut down
    PoolClosed,
    /// Upstream answered with a 4xx status
    UpstreamClientError { status: u16, uri: String },
    /// Establishing a new connection took longer than the connect timeout
    ConnectTimeout { route: String, after: Duration },
    /// No response data arrived within the socket timeout
    ReadTimeout { route: String, after: Duration },
    /// Failed to open a transport connection
    Connect { route: String, source: io::Error },
    /// TLS/SSL error
    Tls(String),
    /// HTTP protocol error
    Http(String),
    /// Request URI cannot be routed
    InvalidUri(String),
    /// Response payload could not be decoded
    Decode(String),
    /// Configuration error
    Config(String),
    /// IO error
    Io(io::Error),
}

impl ClientError {
    /// HTTP status the quote endpoint answers with when a request fails with this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ClientError::PoolExhausted { .. } | ClientError::PoolClosed => 503,
            ClientError::ConnectTimeout { .. } | ClientError::ReadTimeout { .. } => 504,
            ClientError::UpstreamClientError { status, .. } => *status,
            ClientError::RouteRejected(_) | ClientError::Config(_) => 500,
            _ => 502,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::PoolExhausted { route, waited } => write!(
                f,
                "Connection pool exhausted for {} after {}ms",
                route,
                waited.as_millis()
            ),
            ClientError::RouteRejected(msg) => write!(f, "Route rejected: {}", msg),
            ClientError::PoolClosed => write!(f, "Connection pool is shut down"),
            ClientError::UpstreamClientError { status, uri } => {
                write!(f, "Upstream client error: HTTP {} from {}", status, uri)
            }
            ClientError::ConnectTimeout { route, after } => write!(
                f,
                "Connect timeout: {} not reachable within {}ms",
                route,
                after.as_millis()
            ),
            ClientError::ReadTimeout { route, after } => write!(
                f,
                "Read timeout: no data from {} within {}ms",
                route,
                after.as_millis()
            ),
            ClientError::Connect { route, source } => {
                write!(f, "Failed to connect to {}: {}", route, source)
            }
            ClientError::Tls(msg) => write!(f, "TLS error: {}", msg),
            ClientError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ClientError::InvalidUri(msg) => write!(f, "Invalid URI: {}", msg),
            ClientError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ClientError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ClientError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect { source, .. } => Some(source),
            ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<hyper::Error> for ClientError {
    fn from(err: hyper::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

/// Convenience type alias for Results using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_pool_exhausted_display() {
        let err = ClientError::PoolExhausted {
            route: "http://example.com:80".to_string(),
            waited: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted for http://example.com:80 after 250ms"
        );
    }

    #[test]
    fn test_upstream_client_error_display() {
        let err = ClientError::UpstreamClientError {
            status: 404,
            uri: "http://example.com/missing".to_string(),
        };
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("/missing"));
    }

    #[test]
    fn test_timeouts_display() {
        let err = ClientError::ConnectTimeout {
            route: "https://example.com:443".to_string(),
            after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30000ms"));

        let err = ClientError::ReadTimeout {
            route: "https://example.com:443".to_string(),
            after: Duration::from_secs(60),
        };
        assert!(err.to_string().starts_with("Read timeout"));
    }

    #[test]
    fn test_config_display() {
        let err = ClientError::Config("max_total must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: max_total must be positive"
        );
    }

    #[test]
    fn test_status_codes() {
        let exhausted = ClientError::PoolExhausted {
            route: "r".to_string(),
            waited: Duration::ZERO,
        };
        assert_eq!(exhausted.status_code(), 503);
        assert_eq!(ClientError::PoolClosed.status_code(), 503);
        let timeout = ClientError::ReadTimeout {
            route: "r".to_string(),
            after: Duration::ZERO,
        };
        assert_eq!(timeout.status_code(), 504);
        assert_eq!(ClientError::Http("reset".to_string()).status_code(), 502);
        assert_eq!(ClientError::Decode("bad json".to_string()).status_code(), 502);
        assert_eq!(ClientError::RouteRejected("r".to_string()).status_code(), 500);
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: ClientError = io_err.into();
        assert!(matches!(err, ClientError::Io(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_connect_source() {
        let err = ClientError::Connect {
            route: "http://example.com:80".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_source_none() {
        assert!(ClientError::PoolClosed.source().is_none());
        assert!(ClientError::Tls("handshake".to_string()).source().is_none());
    }
}
