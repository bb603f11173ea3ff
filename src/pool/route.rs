//! Destination key used to partition the pool.

use crate::error::ClientError;
use hyper::Uri;
use std::borrow::Cow;
use std::fmt;

/// Transport scheme of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("http") {
            Some(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Some(Scheme::Https)
        } else {
            None
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn is_tls(self) -> bool {
        self == Scheme::Https
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A (scheme, host, port) destination. Equality is structural.
///
/// IPv6 literals are stored bare (`::1`); brackets are added back
/// wherever the host is written next to a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Route {
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Route {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Derive the route from an absolute URI
    pub fn from_uri(uri: &Uri) -> Result<Self, ClientError> {
        let host = uri
            .host()
            .ok_or_else(|| ClientError::InvalidUri(format!("no host in {}", uri)))?;
        let scheme = match uri.scheme_str() {
            Some(s) => Scheme::parse(s)
                .ok_or_else(|| ClientError::InvalidUri(format!("unsupported scheme {}", s)))?,
            None => Scheme::Http,
        };
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Route::new(scheme, host, port))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Bare host name or address, suitable for resolving and for TLS SNI
    pub fn host(&self) -> &str {
        &self.host
    }

    fn host_for_authority(&self) -> Cow<'_, str> {
        if self.host.contains(':') {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(self.host.as_str())
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the Host header (port omitted when it is the scheme default)
    pub fn authority(&self) -> String {
        let host = self.host_for_authority();
        if self.port == self.scheme.default_port() {
            host.into_owned()
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            self.scheme.as_str(),
            self.host_for_authority(),
            self.port
        )
    }
}
